//! Concrete request/response bodies carried inside a [`Message`].
//!
//! Bodies are JSON. Routing only ever inspects the user identity (and, for
//! fetch replies, the emptiness flag); everything else is opaque to it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::envelope::{Message, RequestType};
use crate::errors::RelayError;
use crate::ids::UserId;

/// Anything that carries the routing key.
pub trait Identified {
    fn uid(&self) -> &UserId;
}

/// A typed body bound to one request type.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const REQUEST_TYPE: RequestType;

    fn decode(body: &[u8]) -> Result<Self, RelayError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Decode from a message, rejecting a mismatched request type.
    fn from_message(message: &Message) -> Result<Self, RelayError> {
        if message.request_type() != Self::REQUEST_TYPE {
            return Err(RelayError::Decode(format!(
                "expected {}, got {}",
                Self::REQUEST_TYPE,
                message.request_type()
            )));
        }
        Self::decode(message.body())
    }

    fn encode(&self) -> Vec<u8> {
        // Plain structs of strings/bools/vecs cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    fn to_request(&self) -> Message {
        Message::request(Self::REQUEST_TYPE, self.encode())
    }

    fn to_response(&self) -> Message {
        Message::response(Self::REQUEST_TYPE, self.encode())
    }
}

#[derive(Deserialize)]
struct Addressed {
    uid: UserId,
}

/// Pull the routing key out of any body without knowing its concrete type.
/// Every payload carries a top-level `uid`.
pub fn routing_key(body: &[u8]) -> Result<UserId, RelayError> {
    let addressed: Addressed = serde_json::from_slice(body)?;
    if addressed.uid.is_empty() {
        return Err(RelayError::Decode("empty uid".into()));
    }
    Ok(addressed.uid)
}

macro_rules! identified {
    ($($ty:ty => $code:expr),* $(,)?) => {
        $(
            impl Identified for $ty {
                fn uid(&self) -> &UserId {
                    &self.uid
                }
            }

            impl Payload for $ty {
                const REQUEST_TYPE: RequestType = $code;
            }
        )*
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub uid: UserId,
    #[serde(default)]
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub uid: UserId,
    pub ok: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub uid: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub uid: UserId,
    pub is_empty: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl FetchResponse {
    /// The reply sent when a fetch cannot be served.
    pub fn empty(uid: UserId) -> Self {
        Self {
            uid,
            is_empty: true,
            messages: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub uid: UserId,
    pub to: UserId,
    pub msg_id: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub uid: UserId,
    pub msg_id: String,
    pub ok: bool,
}

identified! {
    AuthenticateRequest => RequestType::AUTHENTICATE,
    AuthenticateResponse => RequestType::AUTHENTICATE,
    FetchRequest => RequestType::FETCH_MESSAGE,
    FetchResponse => RequestType::FETCH_MESSAGE,
    SendMessageRequest => RequestType::SEND_MESSAGE,
    SendMessageResponse => RequestType::SEND_MESSAGE,
}
