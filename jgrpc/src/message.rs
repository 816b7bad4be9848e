use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

/// One remote invocation. Field names are part of the JSON wire contract,
/// so they serialize in camelCase; type descriptors are plain strings.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub interface_name: String,
    pub method_name: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default)]
    pub request_id: String,
}

impl RpcRequest {
    #[must_use]
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        parameters: Vec<Value>,
        param_types: Vec<String>,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            parameters,
            param_types,
            request_id: String::default(),
        }
    }
}

/// The result of one invocation, echoing the request's correlation id.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error_message: String,
    pub success: bool,
    #[serde(default)]
    pub request_id: String,
}

impl RpcResponse {
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            data,
            success: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fail(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            success: false,
            ..Self::default()
        }
    }
}

/// Message kind byte of the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgKind {
    Request = 1,
    Response = 2,
    HeartbeatRequest = 3,
    HeartbeatResponse = 4,
}

impl MsgKind {
    /// # Errors
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(MsgKind::Request),
            2 => Ok(MsgKind::Response),
            3 => Ok(MsgKind::HeartbeatRequest),
            4 => Ok(MsgKind::HeartbeatResponse),
            _ => Err(Error::new(
                ErrorKind::InvalidFrame,
                format!("unknown message kind: {byte}"),
            )),
        }
    }

    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Decoded frame body. The pairing of body variant and message kind is
/// fixed: requests under kind 1, responses under kind 2, heartbeat text
/// under kinds 3/4. Length-zero bodies decode to `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Request(RpcRequest),
    Response(RpcResponse),
    Text(String),
    Empty,
}

/// One on-the-wire message: the header metadata plus the decoded body.
/// The correlation id is not part of the envelope; it rides inside the
/// request/response records.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub serializer: u8,
    pub kind: MsgKind,
    pub body: Body,
}

impl Message {
    #[must_use]
    pub fn request(serializer: u8, request: RpcRequest) -> Self {
        Self {
            serializer,
            kind: MsgKind::Request,
            body: Body::Request(request),
        }
    }

    #[must_use]
    pub fn response(serializer: u8, response: RpcResponse) -> Self {
        Self {
            serializer,
            kind: MsgKind::Response,
            body: Body::Response(response),
        }
    }

    #[must_use]
    pub fn ping(serializer: u8) -> Self {
        Self {
            serializer,
            kind: MsgKind::HeartbeatRequest,
            body: Body::Text("ping".to_string()),
        }
    }

    #[must_use]
    pub fn pong(serializer: u8) -> Self {
        Self {
            serializer,
            kind: MsgKind::HeartbeatResponse,
            body: Body::Text("pong".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let mut req = RpcRequest::new(
            "demo.Hello",
            "hello",
            vec![Value::String("world".into())],
            vec!["String".into()],
        );
        req.request_id = "1-2".into();

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["interfaceName"], "demo.Hello");
        assert_eq!(json["methodName"], "hello");
        assert_eq!(json["paramTypes"][0], "String");
        assert_eq!(json["requestId"], "1-2");
    }

    #[test]
    fn test_response_constructors() {
        let ok = RpcResponse::success(Value::from(42));
        assert!(ok.success);
        assert!(ok.error_message.is_empty());

        let fail = RpcResponse::fail("boom");
        assert!(!fail.success);
        assert_eq!(fail.error_message, "boom");

        let json = serde_json::to_value(&fail).unwrap();
        assert_eq!(json["errorMessage"], "boom");
    }

    #[test]
    fn test_msg_kind_bytes() {
        for byte in 1..=4u8 {
            assert_eq!(MsgKind::from_byte(byte).unwrap().as_byte(), byte);
        }
        let err = MsgKind::from_byte(9).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidFrame);
    }
}
