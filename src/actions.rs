use std::fmt::Display;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{events::Status, serial::OutboundRequest, settings::ConnectionSettings};

const PORT: &str = "port";
const BAUD_RATE: &str = "baudRate";
const COMMAND: &str = "command";

/// Actions a user can ask of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Attach to this port at this baud rate instead.
    ///
    /// On wire: `{"port": "COM3", "baudRate": "9600"}`.
    Reconfigure(ConnectionSettings),

    /// Write this to the device.
    ///
    /// On wire: `{"command": "PING"}`.
    Command(OutboundRequest),
}

/// A request field the server knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `port`
    Port,

    /// `baudRate`
    BaudRate,

    /// `command`
    Command,
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Port => write!(f, "port"),
            Field::BaudRate => write!(f, "baud rate"),
            Field::Command => write!(f, "command"),
        }
    }
}

/// Ways a request can be wrong.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Not a JSON object at all.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// Fields were present but held the wrong JSON types.
    /// Every such field is listed.
    #[error("Wrong type for field(s): {0:?}")]
    WrongTypes(Vec<Field>),

    /// The baud rate string was not a positive integer.
    #[error("Bad baud rate `{0}`")]
    BadBaudRate(String),

    /// Neither `port` and `baudRate`, nor `command`, was present.
    #[error("Request has neither `port` and `baudRate`, nor `command`")]
    Unrecognized,
}

impl RequestError {
    /// The statuses clients should see, if any.
    ///
    /// Requests which are not JSON objects are only logged.
    pub fn statuses(&self) -> Vec<Status> {
        match self {
            RequestError::BadJson { .. } => vec![],
            RequestError::WrongTypes(fields) => {
                fields.iter().copied().map(Status::InvalidType).collect()
            }
            RequestError::BadBaudRate(value) => vec![Status::BadBaudRate(value.clone())],
            RequestError::Unrecognized => vec![Status::UnrecognizedRequest],
        }
    }
}

fn parse_baud_rate(value: &str) -> Result<u32, RequestError> {
    match value.trim().parse::<u32>() {
        Ok(baud_rate) if baud_rate > 0 => Ok(baud_rate),
        _ => Err(RequestError::BadBaudRate(value.into())),
    }
}

impl Action {
    /// Decode a request as sent by a client.
    ///
    /// The reconfigure shape is tried first, then the command shape.
    pub fn parse(request: &str) -> Result<Self, RequestError> {
        let object: Map<String, Value> =
            serde_json::from_str(request).map_err(|e| RequestError::BadJson {
                request: request.into(),
                problem: e.to_string(),
            })?;

        if let (Some(port), Some(baud_rate)) = (object.get(PORT), object.get(BAUD_RATE)) {
            return match (port.as_str(), baud_rate.as_str()) {
                (Some(port), Some(baud_rate)) => Ok(Self::Reconfigure(ConnectionSettings::new(
                    port,
                    parse_baud_rate(baud_rate)?,
                ))),
                (port, baud_rate) => {
                    let mut wrong = vec![];
                    if port.is_none() {
                        wrong.push(Field::Port);
                    }
                    if baud_rate.is_none() {
                        wrong.push(Field::BaudRate);
                    }
                    Err(RequestError::WrongTypes(wrong))
                }
            };
        }

        if let Some(command) = object.get(COMMAND) {
            return match command.as_str() {
                Some(command) => Ok(Self::Command(OutboundRequest::new(command))),
                None => Err(RequestError::WrongTypes(vec![Field::Command])),
            };
        }

        Err(RequestError::Unrecognized)
    }

    /// Turn an action into serialized json, the way clients send it.
    pub fn serialize(&self) -> String {
        match self {
            Action::Reconfigure(settings) => json!({
                PORT: settings.port,
                BAUD_RATE: settings.baud_rate.to_string(),
            }),
            Action::Command(request) => json!({ COMMAND: request.command() }),
        }
        .to_string()
    }

    /// Attach to `port` at `baud_rate`.
    pub fn reconfigure(port: &str, baud_rate: u32) -> Self {
        Self::Reconfigure(ConnectionSettings::new(port, baud_rate))
    }

    /// Write `command` to the device.
    pub fn command(command: &str) -> Self {
        Self::Command(OutboundRequest::new(command))
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Reconfigure(settings) => write!(f, "reconfigure: {settings}"),
            Action::Command(request) => write!(f, "command: {request}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reconfigure() {
        let action = Action::parse(r#"{"port": "COM3", "baudRate": "9600"}"#).unwrap();

        assert_eq!(action, Action::reconfigure("COM3", 9600));
    }

    #[test]
    fn command_gets_delimiter() {
        let action = Action::parse(r#"{"command": "PING"}"#).unwrap();

        let Action::Command(request) = &action else {
            panic!("Expected command, got {action:?}");
        };
        assert_eq!(request.as_bytes(), b"PING\n");
    }

    #[test]
    fn reconfigure_wins_over_command() {
        let action =
            Action::parse(r#"{"port": "COM1", "baudRate": "115200", "command": "x"}"#).unwrap();

        assert_eq!(action, Action::reconfigure("COM1", 115_200));
    }

    #[test]
    fn wrong_types_are_reported_per_field() {
        let err = Action::parse(r#"{"port": 3, "baudRate": "9600"}"#).unwrap_err();
        assert_eq!(err, RequestError::WrongTypes(vec![Field::Port]));

        let err = Action::parse(r#"{"port": "COM3", "baudRate": 9600}"#).unwrap_err();
        assert_eq!(err, RequestError::WrongTypes(vec![Field::BaudRate]));

        let err = Action::parse(r#"{"port": null, "baudRate": []}"#).unwrap_err();
        assert_eq!(
            err.statuses(),
            vec![
                Status::InvalidType(Field::Port),
                Status::InvalidType(Field::BaudRate)
            ]
        );

        let err = Action::parse(r#"{"command": {"nested": true}}"#).unwrap_err();
        assert_eq!(err, RequestError::WrongTypes(vec![Field::Command]));
    }

    #[test]
    fn baud_rate_must_be_a_positive_integer() {
        for bad in ["fast", "", "-9600", "0", "96.00", "99999999999"] {
            let request = json!({"port": "COM3", "baudRate": bad}).to_string();
            let err = Action::parse(&request).unwrap_err();

            assert_eq!(err, RequestError::BadBaudRate(bad.into()), "input: {bad}");
        }
    }

    #[test]
    fn not_json_is_bad_json() {
        let err = Action::parse("hi").unwrap_err();

        assert!(matches!(err, RequestError::BadJson { .. }));
        assert!(err.statuses().is_empty());

        let err = Action::parse(r#"["port", "COM3"]"#).unwrap_err();
        assert!(matches!(err, RequestError::BadJson { .. }));
    }

    #[test]
    fn neither_shape_is_unrecognized() {
        let err = Action::parse(r#"{"port": "COM3"}"#).unwrap_err();
        assert_eq!(err, RequestError::Unrecognized);

        let err = Action::parse("{}").unwrap_err();
        assert_eq!(err.statuses(), vec![Status::UnrecognizedRequest]);
    }

    #[test]
    fn serialize_matches_what_clients_send() {
        let action = Action::reconfigure("/dev/ttyACM0", 115_200);
        assert_eq!(Action::parse(&action.serialize()).unwrap(), action);

        let value: Value = serde_json::from_str(&action.serialize()).unwrap();
        assert_eq!(value, json!({"port": "/dev/ttyACM0", "baudRate": "115200"}));

        let value: Value = serde_json::from_str(&Action::command("AT").serialize()).unwrap();
        assert_eq!(value, json!({"command": "AT"}));
    }
}
