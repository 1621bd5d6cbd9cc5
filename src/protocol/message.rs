//! Bolt request/response messages (§3): each is a PackStream structure whose signature
//! identifies the kind.

use crate::constant::{request, response};
use crate::error::{Error, Result};
use crate::packstream::encoder::StructWriter;
use crate::packstream::{Decoder, Value};

pub type Fields = Vec<(String, Value)>;

/// A request message this core can send. Encoding follows the "struct writer declares its
/// field count up front" contract from §4.1.
#[derive(Debug, Clone)]
pub enum Request {
    Hello { extra: Fields },
    Logon { auth: Fields },
    Logoff,
    Goodbye,
    Reset,
    Run {
        query: String,
        parameters: Fields,
        extra: Fields,
    },
    Discard {
        n: i64,
        qid: i64,
    },
    Pull {
        n: i64,
        qid: i64,
    },
    Begin {
        extra: Fields,
    },
    Commit,
    Rollback,
    Route {
        routing_context: Fields,
        bookmarks: Vec<String>,
        extra: Fields,
    },
    Telemetry {
        api: i64,
    },
}

/// `DISCARD`/`PULL` carry a single metadata map with `n` and, when not omittable, `qid`.
fn pull_metadata(n: i64, qid: i64) -> Fields {
    let mut extra = vec![("n".to_string(), Value::Integer(n))];
    if qid != -1 {
        extra.push(("qid".to_string(), Value::Integer(qid)));
    }
    extra
}

impl Request {
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Request::Hello { extra } => write_one_map(out, request::HELLO, extra),
            Request::Logon { auth } => write_one_map(out, request::LOGON, auth),
            Request::Logoff => write_no_fields(out, request::LOGOFF),
            Request::Goodbye => write_no_fields(out, request::GOODBYE),
            Request::Reset => write_no_fields(out, request::RESET),
            Request::Run {
                query,
                parameters,
                extra,
            } => {
                let mut writer = StructWriter::new(out, request::RUN, 3);
                writer.field(&Value::String(query.clone()))?;
                writer.field(&Value::Map(parameters.clone()))?;
                writer.field(&Value::Map(extra.clone()))?;
                writer.finish()
            }
            Request::Discard { n, qid } => write_one_map(out, request::DISCARD, &pull_metadata(*n, *qid)),
            Request::Pull { n, qid } => write_one_map(out, request::PULL, &pull_metadata(*n, *qid)),
            Request::Begin { extra } => write_one_map(out, request::BEGIN, extra),
            Request::Commit => write_no_fields(out, request::COMMIT),
            Request::Rollback => write_no_fields(out, request::ROLLBACK),
            Request::Route {
                routing_context,
                bookmarks,
                extra,
            } => {
                let mut writer = StructWriter::new(out, request::ROUTE, 3);
                writer.field(&Value::Map(routing_context.clone()))?;
                writer.field(&Value::List(
                    bookmarks.iter().cloned().map(Value::String).collect(),
                ))?;
                writer.field(&Value::Map(extra.clone()))?;
                writer.finish()
            }
            Request::Telemetry { api } => {
                let extra = vec![("api".to_string(), Value::Integer(*api))];
                write_one_map(out, request::TELEMETRY, &extra)
            }
        }
    }

    /// Human-readable request name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "HELLO",
            Request::Logon { .. } => "LOGON",
            Request::Logoff => "LOGOFF",
            Request::Goodbye => "GOODBYE",
            Request::Reset => "RESET",
            Request::Run { .. } => "RUN",
            Request::Discard { .. } => "DISCARD",
            Request::Pull { .. } => "PULL",
            Request::Begin { .. } => "BEGIN",
            Request::Commit => "COMMIT",
            Request::Rollback => "ROLLBACK",
            Request::Route { .. } => "ROUTE",
            Request::Telemetry { .. } => "TELEMETRY",
        }
    }
}

fn write_no_fields(out: &mut Vec<u8>, signature: u8) -> Result<()> {
    StructWriter::new(out, signature, 0).finish()
}

fn write_one_map(out: &mut Vec<u8>, signature: u8, map: &Fields) -> Result<()> {
    let mut writer = StructWriter::new(out, signature, 1);
    writer.field(&Value::Map(map.clone()))?;
    writer.finish()
}

/// A response message read off the wire (§3, §4.4).
#[derive(Debug, Clone)]
pub enum Response {
    Success(Fields),
    Record(Vec<Value>),
    Failure {
        code: String,
        message: String,
        gql_status: Option<String>,
    },
    Ignored,
}

impl Response {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(payload);
        let (signature, field_count) = decoder.read_struct_header()?;
        let result = match signature {
            response::SUCCESS => {
                assert_field_count("SUCCESS", field_count, 1)?;
                let metadata = decoder.read_value()?;
                Response::Success(into_map(metadata)?)
            }
            response::RECORD => {
                assert_field_count("RECORD", field_count, 1)?;
                let fields = decoder.read_value()?;
                match fields {
                    Value::List(items) => Response::Record(items),
                    other => {
                        return Err(Error::ProtocolError(format!(
                            "RECORD field should be a list, got {other}"
                        )));
                    }
                }
            }
            response::FAILURE => {
                assert_field_count("FAILURE", field_count, 1)?;
                let metadata = into_map(decoder.read_value()?)?;
                let code = find_string(&metadata, "code").unwrap_or_default();
                let message = find_string(&metadata, "message").unwrap_or_default();
                let gql_status = find_string(&metadata, "gql_status");
                Response::Failure {
                    code,
                    message,
                    gql_status,
                }
            }
            response::IGNORED => {
                assert_field_count("IGNORED", field_count, 0)?;
                Response::Ignored
            }
            other => {
                return Err(Error::ProtocolError(format!(
                    "unknown response signature 0x{other:02X}"
                )));
            }
        };
        if !decoder.is_empty() {
            return Err(Error::ProtocolError(
                "trailing bytes after response message".into(),
            ));
        }
        Ok(result)
    }
}

fn into_map(value: Value) -> Result<Fields> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(Error::ProtocolError(format!(
            "expected a metadata map, got {other}"
        ))),
    }
}

fn find_string(fields: &Fields, key: &str) -> Option<String> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.as_str())
        .map(str::to_string)
}

/// Enforces "the number of fields consumed must equal the declared size" from §4.1.
fn assert_field_count(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::ProtocolError(format!(
            "{name} should have {expected} field(s) but has {actual}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_run_with_three_fields() {
        let req = Request::Run {
            query: "RETURN $x".into(),
            parameters: vec![("x".to_string(), Value::Integer(1))],
            extra: Fields::new(),
        };
        let mut out = Vec::new();
        req.encode(&mut out).unwrap();
        // TINY_STRUCT marker with 3 fields: 0xB3, then signature RUN.
        assert_eq!(out[0], 0xB3);
        assert_eq!(out[1], request::RUN);
    }

    #[test]
    fn decodes_success_response() {
        let mut out = Vec::new();
        {
            let mut writer = StructWriter::new(&mut out, response::SUCCESS, 1);
            writer
                .field(&Value::map_from([("fields".to_string(), Value::List(vec![]))]))
                .unwrap();
            writer.finish().unwrap();
        }
        let response = Response::decode(&out).unwrap();
        assert!(matches!(response, Response::Success(_)));
    }

    #[test]
    fn decodes_failure_response_with_code_and_message() {
        let mut out = Vec::new();
        {
            let mut writer = StructWriter::new(&mut out, response::FAILURE, 1);
            writer
                .field(&Value::map_from([
                    ("code".to_string(), Value::String("Neo.ClientError.Statement.SyntaxError".into())),
                    ("message".to_string(), Value::String("bad syntax".into())),
                ]))
                .unwrap();
            writer.finish().unwrap();
        }
        match Response::decode(&out).unwrap() {
            Response::Failure { code, message, .. } => {
                assert_eq!(code, "Neo.ClientError.Statement.SyntaxError");
                assert_eq!(message, "bad syntax");
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn wrong_field_count_is_protocol_error() {
        let mut out = Vec::new();
        StructWriter::new(&mut out, response::IGNORED, 0).finish().unwrap();
        out.pop(); // corrupt: drop the signature byte, forcing a header/field mismatch
        assert!(Response::decode(&out).is_err());
    }
}
