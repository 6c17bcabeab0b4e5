//! Response assembly and reply decoding.
//!
//! A response carries the request's correlation `id` plus either the
//! collected `values` or an `error` string. Callback invocations reuse the
//! same shape with an extra `cbId` discriminator, and the host's callback
//! reply comes back in that shape too, so this module both builds outbound
//! responses and decodes inbound replies.

use cbind_core::{BridgeError, BridgeResult, VarArray, VarDict, Variant};

/// Accumulator for one outbound response.
#[derive(Debug)]
pub struct Response {
    id: i32,
    cb_id: Option<i32>,
    values: Vec<Variant>,
    error: Option<String>,
}

impl Response {
    /// Start a response for the given correlation id.
    pub fn new(id: i32) -> Self {
        Self {
            id,
            cb_id: None,
            values: Vec::new(),
            error: None,
        }
    }

    /// The correlation id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Tag this response as callback invocation `cb_id`.
    pub fn set_cb_id(&mut self, cb_id: i32) {
        self.cb_id = Some(cb_id);
    }

    /// The callback discriminator, if any.
    pub fn cb_id(&self) -> Option<i32> {
        self.cb_id
    }

    /// Append a value. The response takes its own reference.
    pub fn push_value(&mut self, value: Variant) {
        self.values.push(value);
    }

    /// The accumulated values.
    pub fn values(&self) -> &[Variant] {
        &self.values
    }

    /// Record the error that aborted the batch. Only the first error is
    /// kept.
    pub fn set_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// True once an error is recorded.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Build the wire variant: `{id, values}`, `{cbId, id, values}`, or
    /// `{id, error}`.
    pub fn into_variant(self) -> Variant {
        let dict = VarDict::new();
        dict.set("id", Variant::Int32(self.id));
        if let Some(cb_id) = self.cb_id {
            dict.set("cbId", Variant::Int32(cb_id));
        }
        match self.error {
            Some(error) => dict.set("error", Variant::from_utf8(&error)),
            None => {
                dict.set(
                    "values",
                    Variant::Array(self.values.into_iter().collect::<VarArray>()),
                );
            }
        }
        Variant::Dictionary(dict)
    }

    /// Decode an inbound reply (`{id, cbId?, values?}`).
    pub fn from_variant(variant: &Variant) -> BridgeResult<Self> {
        let dict = variant.as_dictionary().ok_or_else(|| {
            BridgeError::ProtocolError(format!(
                "reply must be a dictionary, got {}",
                variant.type_name()
            ))
        })?;
        let id = dict
            .get("id")
            .as_int32()
            .ok_or_else(|| BridgeError::ProtocolError("reply \"id\" must be an int32".into()))?;

        let cb_id = match dict.get("cbId") {
            Variant::Undefined => None,
            value => Some(value.as_int32().ok_or_else(|| {
                BridgeError::ProtocolError("reply \"cbId\" must be an int32".into())
            })?),
        };

        let values = match dict.get("values") {
            Variant::Undefined => Vec::new(),
            Variant::Array(arr) => arr.to_vec(),
            other => {
                return Err(BridgeError::ProtocolError(format!(
                    "reply \"values\" must be an array, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            id,
            cb_id,
            values,
            error: None,
        })
    }
}
