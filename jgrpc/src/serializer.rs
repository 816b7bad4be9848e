use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, RwLock},
};

use crate::{
    error::{Error, ErrorKind, Result},
    message::{Body, MsgKind},
};

/// Serializer tag for the MessagePack body codec.
pub const BINARY_TAG: u8 = 0;
/// Serializer tag for the JSON body codec.
pub const JSON_TAG: u8 = 1;

/// A body codec. The codec is picked by the one-byte tag in the frame
/// header; the body's record type is determined by the message kind.
pub trait Serializer: Send + Sync {
    fn tag(&self) -> u8;

    /// # Errors
    fn encode(&self, body: &Body) -> Result<Vec<u8>>;

    /// # Errors
    fn decode(&self, bytes: &[u8], kind: MsgKind) -> Result<Body>;
}

/// MessagePack codec (tag 0). The highest-fidelity self-describing
/// object-graph encoding in the stack; field names are kept on the wire
/// so partially populated records still decode.
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn tag(&self) -> u8 {
        BINARY_TAG
    }

    fn encode(&self, body: &Body) -> Result<Vec<u8>> {
        match body {
            Body::Request(req) => Ok(rmp_serde::to_vec_named(req)?),
            Body::Response(rsp) => Ok(rmp_serde::to_vec_named(rsp)?),
            Body::Text(text) => Ok(rmp_serde::to_vec_named(text)?),
            Body::Empty => Ok(Vec::new()),
        }
    }

    fn decode(&self, bytes: &[u8], kind: MsgKind) -> Result<Body> {
        if bytes.is_empty() {
            return Ok(Body::Empty);
        }
        match kind {
            MsgKind::Request => Ok(Body::Request(rmp_serde::from_slice(bytes)?)),
            MsgKind::Response => Ok(Body::Response(rmp_serde::from_slice(bytes)?)),
            MsgKind::HeartbeatRequest | MsgKind::HeartbeatResponse => {
                Ok(Body::Text(rmp_serde::from_slice(bytes)?))
            }
        }
    }
}

/// JSON codec (tag 1), for debuggability and language independence.
/// Type descriptors are carried as plain name strings; that shape is part
/// of the wire contract.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn tag(&self) -> u8 {
        JSON_TAG
    }

    fn encode(&self, body: &Body) -> Result<Vec<u8>> {
        let encoded = match body {
            Body::Request(req) => serde_json::to_vec(req),
            Body::Response(rsp) => serde_json::to_vec(rsp),
            Body::Text(text) => serde_json::to_vec(text),
            Body::Empty => return Ok(Vec::new()),
        };
        encoded.map_err(|e| Error::new(ErrorKind::SerializeFailed, e.to_string()))
    }

    fn decode(&self, bytes: &[u8], kind: MsgKind) -> Result<Body> {
        if bytes.is_empty() {
            return Ok(Body::Empty);
        }
        let decoded = match kind {
            MsgKind::Request => serde_json::from_slice(bytes).map(Body::Request),
            MsgKind::Response => serde_json::from_slice(bytes).map(Body::Response),
            MsgKind::HeartbeatRequest | MsgKind::HeartbeatResponse => {
                serde_json::from_slice(bytes).map(Body::Text)
            }
        };
        decoded.map_err(|e| Error::new(ErrorKind::DeserializeFailed, e.to_string()))
    }
}

type Registry = RwLock<HashMap<u8, Arc<dyn Serializer>>>;

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let mut map: HashMap<u8, Arc<dyn Serializer>> = HashMap::new();
    map.insert(BINARY_TAG, Arc::new(BinarySerializer));
    map.insert(JSON_TAG, Arc::new(JsonSerializer));
    RwLock::new(map)
});

/// Registers a serializer process-wide under its own tag. The last
/// registration for a tag wins.
pub fn register(serializer: Arc<dyn Serializer>) {
    let mut registry = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    registry.insert(serializer.tag(), serializer);
}

/// # Errors
///
/// Returns `UnknownSerializer` for a tag nobody registered.
pub fn lookup(tag: u8) -> Result<Arc<dyn Serializer>> {
    let registry = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
    registry.get(&tag).cloned().ok_or_else(|| {
        Error::new(
            ErrorKind::UnknownSerializer,
            format!("unknown serializer tag: {tag}"),
        )
    })
}
