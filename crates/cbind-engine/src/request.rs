//! Request decoding.
//!
//! A request is a dictionary variant with a correlation `id` and up to four
//! optional sections: `set` preloads handles, `commands` lists the function
//! invocations to run, `get` names the handles whose values go into the
//! response, and `destroy` names the handles to drop at the end.
//!
//! Parsing validates the frame and keeps the sections as shared views over
//! the incoming variant; nothing is copied. Applying `set` is transactional
//! per request: if any entry fails, every handle this request registered is
//! rolled back before the error is reported.

use cbind_core::{
    BridgeError, BridgeResult, Handle, HandleTable, HandleValue, VarArray, VarDict, Variant,
};

/// Decoded request frame.
#[derive(Debug)]
pub struct Request {
    id: i32,
    set: Option<VarDict>,
    commands: Option<VarArray>,
    get: Option<VarArray>,
    destroy: Option<VarArray>,
}

fn section_array(dict: &VarDict, key: &str) -> BridgeResult<Option<VarArray>> {
    match dict.get(key) {
        Variant::Undefined => Ok(None),
        Variant::Array(arr) => Ok(Some(arr)),
        other => Err(BridgeError::ProtocolError(format!(
            "\"{}\" must be an array, got {}",
            key,
            other.type_name()
        ))),
    }
}

fn handle_from(value: &Variant, what: &str) -> BridgeResult<Handle> {
    value.as_int32().ok_or_else(|| {
        BridgeError::ProtocolError(format!(
            "{} must be an int32 handle, got {}",
            what,
            value.type_name()
        ))
    })
}

impl Request {
    /// Decode the frame of a request variant.
    pub fn parse(variant: &Variant) -> BridgeResult<Self> {
        let dict = variant.as_dictionary().ok_or_else(|| {
            BridgeError::ProtocolError(format!(
                "request must be a dictionary, got {}",
                variant.type_name()
            ))
        })?;

        let id = dict.get("id").as_int32().ok_or_else(|| {
            BridgeError::ProtocolError("request \"id\" must be an int32".into())
        })?;

        let set = match dict.get("set") {
            Variant::Undefined => None,
            Variant::Dictionary(set) => Some(set),
            other => {
                return Err(BridgeError::ProtocolError(format!(
                    "\"set\" must be a dictionary, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            id,
            set,
            commands: section_array(dict, "commands")?,
            get: section_array(dict, "get")?,
            destroy: section_array(dict, "destroy")?,
        })
    }

    /// The request's correlation id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Number of commands in the batch.
    pub fn command_count(&self) -> usize {
        self.commands.as_ref().map_or(0, |c| c.len())
    }

    fn command(&self, index: usize) -> BridgeResult<VarDict> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| BridgeError::ProtocolError("request has no commands".into()))?;
        match commands.get(index) {
            Variant::Dictionary(cmd) => Ok(cmd),
            other => Err(BridgeError::ProtocolError(format!(
                "command {} must be a dictionary, got {}",
                index,
                other.type_name()
            ))),
        }
    }

    /// Function id of the command at `index`.
    pub fn command_function(&self, index: usize) -> BridgeResult<i32> {
        let cmd = self.command(index)?;
        cmd.get("id").as_int32().ok_or_else(|| {
            BridgeError::ProtocolError(format!("command {} \"id\" must be an int32", index))
        })
    }

    /// Number of argument handles of the command at `index`.
    pub fn command_arg_count(&self, index: usize) -> BridgeResult<usize> {
        match self.command(index)?.get("args") {
            Variant::Undefined => Ok(0),
            Variant::Array(args) => Ok(args.len()),
            other => Err(BridgeError::ProtocolError(format!(
                "command {} \"args\" must be an array, got {}",
                index,
                other.type_name()
            ))),
        }
    }

    /// Argument handle `arg_index` of the command at `index`.
    pub fn command_arg(&self, index: usize, arg_index: usize) -> BridgeResult<Handle> {
        match self.command(index)?.get("args") {
            Variant::Array(args) => {
                handle_from(&args.get(arg_index), &format!("command {} arg", index))
            }
            _ => Err(BridgeError::ProtocolError(format!(
                "command {} has no args",
                index
            ))),
        }
    }

    /// True when the command at `index` names a return handle.
    pub fn command_has_ret(&self, index: usize) -> bool {
        self.command(index)
            .map(|cmd| !cmd.get("ret").is_undefined())
            .unwrap_or(false)
    }

    /// Return handle of the command at `index`.
    pub fn command_ret(&self, index: usize) -> BridgeResult<Handle> {
        handle_from(
            &self.command(index)?.get("ret"),
            &format!("command {} ret", index),
        )
    }

    /// Handles whose values the response should carry, in order.
    pub fn get_handles(&self) -> BridgeResult<Vec<Handle>> {
        self.handle_list(&self.get, "get")
    }

    /// Handles to destroy once the batch completes.
    pub fn destroy_handles(&self) -> BridgeResult<Vec<Handle>> {
        self.handle_list(&self.destroy, "destroy")
    }

    fn handle_list(&self, section: &Option<VarArray>, what: &str) -> BridgeResult<Vec<Handle>> {
        let Some(arr) = section else {
            return Ok(Vec::new());
        };
        arr.to_vec()
            .iter()
            .map(|v| handle_from(v, &format!("\"{}\" entry", what)))
            .collect()
    }

    /// Register every `set` entry into `table`.
    ///
    /// Entries are `"handle": [typeTag, value...]` pairs. On any failure the
    /// handles already registered by this call are destroyed again, so a
    /// failed request never leaves partial state behind.
    pub fn apply_set(&self, table: &mut HandleTable) -> BridgeResult<()> {
        let Some(set) = &self.set else {
            return Ok(());
        };

        let mut registered: Vec<Handle> = Vec::new();
        for (key, value) in set.entries() {
            let result = key
                .parse::<Handle>()
                .map_err(|_| {
                    BridgeError::ProtocolError(format!("\"set\" key {:?} is not a handle", key))
                })
                .and_then(|handle| {
                    let typed = decode_set_pair(&value)?;
                    table.register(handle, typed)?;
                    Ok(handle)
                });
            match result {
                Ok(handle) => registered.push(handle),
                Err(err) => {
                    for handle in registered {
                        let _ = table.destroy(handle);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

fn pair_int32(items: &[Variant], tag: &str) -> BridgeResult<i32> {
    match items {
        [_, value] => value.as_int32().ok_or_else(|| BridgeError::TypeMismatch {
            expected: "int32",
            got: value.type_name(),
        }),
        _ => Err(BridgeError::ProtocolError(format!(
            "\"{}\" pair must have exactly one value",
            tag
        ))),
    }
}

fn pair_double(items: &[Variant], tag: &str) -> BridgeResult<f64> {
    match items {
        [_, Variant::Double(d)] => Ok(*d),
        [_, Variant::Int32(i)] => Ok(*i as f64),
        [_, other] => Err(BridgeError::TypeMismatch {
            expected: "float64",
            got: other.type_name(),
        }),
        _ => Err(BridgeError::ProtocolError(format!(
            "\"{}\" pair must have exactly one value",
            tag
        ))),
    }
}

/// Interpret a `[typeTag, value...]` preload pair.
fn decode_set_pair(value: &Variant) -> BridgeResult<HandleValue> {
    let items = match value {
        Variant::Array(arr) => arr.to_vec(),
        other => {
            return Err(BridgeError::ProtocolError(format!(
                "\"set\" value must be a [typeTag, value] array, got {}",
                other.type_name()
            )))
        }
    };
    let tag = match items.first() {
        Some(Variant::String(tag)) => tag.to_string(),
        _ => {
            return Err(BridgeError::ProtocolError(
                "\"set\" pair must start with a type tag string".into(),
            ))
        }
    };

    // Integer payloads narrow with two's complement wraparound.
    match tag.as_str() {
        "int8" => Ok(HandleValue::Int8(pair_int32(&items, &tag)? as i8)),
        "uint8" => Ok(HandleValue::Uint8(pair_int32(&items, &tag)? as u8)),
        "int16" => Ok(HandleValue::Int16(pair_int32(&items, &tag)? as i16)),
        "uint16" => Ok(HandleValue::Uint16(pair_int32(&items, &tag)? as u16)),
        "int32" => Ok(HandleValue::Int32(pair_int32(&items, &tag)?)),
        "uint32" => Ok(HandleValue::Uint32(pair_int32(&items, &tag)? as u32)),
        "long" => match items.as_slice() {
            [_, lo, hi] => {
                let lo = lo.as_int32().ok_or(BridgeError::TypeMismatch {
                    expected: "int32",
                    got: lo.type_name(),
                })?;
                let hi = hi.as_int32().ok_or(BridgeError::TypeMismatch {
                    expected: "int32",
                    got: hi.type_name(),
                })?;
                Ok(HandleValue::Int64(((hi as i64) << 32) | (lo as u32 as i64)))
            }
            _ => Err(BridgeError::ProtocolError(
                "\"long\" pair must be [\"long\", lo, hi]".into(),
            )),
        },
        "float32" => Ok(HandleValue::Float(pair_double(&items, &tag)? as f32)),
        "float64" => Ok(HandleValue::Double(pair_double(&items, &tag)?)),
        "function" => Ok(HandleValue::FuncId(pair_int32(&items, &tag)?)),
        "var" => match items.as_slice() {
            [_, value] => Ok(HandleValue::Var(value.clone())),
            _ => Err(BridgeError::ProtocolError(
                "\"var\" pair must have exactly one value".into(),
            )),
        },
        _ => Err(BridgeError::UnsupportedType(format!(
            "\"set\" type tag \"{}\"",
            tag
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbind_core::json::from_json_str;

    fn parse(text: &str) -> BridgeResult<Request> {
        Request::parse(&from_json_str(text).unwrap())
    }

    #[test]
    fn test_parse_minimal() {
        let req = parse("{\"id\": 1}").unwrap();
        assert_eq!(req.id(), 1);
        assert_eq!(req.command_count(), 0);
        assert!(req.get_handles().unwrap().is_empty());
        assert!(req.destroy_handles().unwrap().is_empty());
    }

    #[test]
    fn test_parse_requires_int_id() {
        assert!(parse("{}").is_err());
        assert!(parse("{\"id\": \"one\"}").is_err());
        assert!(Request::parse(&Variant::Int32(1)).is_err());
    }

    #[test]
    fn test_command_accessors() {
        let req = parse(
            "{\"id\": 1, \"commands\": [{\"id\": 0, \"args\": [1, 2], \"ret\": 3}, {\"id\": -1, \"args\": [4]}]}",
        )
        .unwrap();
        assert_eq!(req.command_count(), 2);
        assert_eq!(req.command_function(0).unwrap(), 0);
        assert_eq!(req.command_arg_count(0).unwrap(), 2);
        assert_eq!(req.command_arg(0, 0).unwrap(), 1);
        assert_eq!(req.command_arg(0, 1).unwrap(), 2);
        assert!(req.command_has_ret(0));
        assert_eq!(req.command_ret(0).unwrap(), 3);

        assert_eq!(req.command_function(1).unwrap(), -1);
        assert!(!req.command_has_ret(1));
        assert!(req.command_ret(1).is_err());
    }

    #[test]
    fn test_apply_set_registers_typed_handles() {
        let req = parse(
            "{\"id\": 1, \"set\": {\
               \"1\": [\"function\", 2],\
               \"2\": [\"int32\", -7],\
               \"3\": [\"uint8\", 300],\
               \"4\": [\"long\", 10, 0],\
               \"5\": [\"float64\", 1.5],\
               \"6\": [\"var\", \"hello\"]}}",
        )
        .unwrap();

        let mut table = HandleTable::new();
        req.apply_set(&mut table).unwrap();
        assert_eq!(table.get_func_id(1).unwrap(), 2);
        assert_eq!(table.get_int32(2).unwrap(), -7);
        // 300 wraps to 44 in a uint8 slot.
        assert_eq!(table.get_uint8(3).unwrap(), 44);
        assert_eq!(table.get_int64(4).unwrap(), 10);
        assert_eq!(table.get_double(5).unwrap(), 1.5);
        assert_eq!(table.get_var(6).unwrap(), Variant::from_utf8("hello"));
        assert_eq!(table.live_count(), 6);
    }

    #[test]
    fn test_apply_set_rolls_back_on_failure() {
        let req = parse(
            "{\"id\": 1, \"set\": {\
               \"1\": [\"int32\", 5],\
               \"2\": [\"bogus\", 0],\
               \"3\": [\"int32\", 6]}}",
        )
        .unwrap();

        let mut table = HandleTable::new();
        assert!(req.apply_set(&mut table).is_err());
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_apply_set_duplicate_handle_rolls_back() {
        let req = parse("{\"id\": 1, \"set\": {\"7\": [\"int32\", 5]}}").unwrap();
        let mut table = HandleTable::new();
        table.register_int32(7, 1).unwrap();

        assert!(req.apply_set(&mut table).is_err());
        // The pre-existing handle survives untouched.
        assert_eq!(table.get_int32(7).unwrap(), 1);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_malformed_sections() {
        assert!(parse("{\"id\": 1, \"set\": []}").is_err());
        assert!(parse("{\"id\": 1, \"commands\": {}}").is_err());
        assert!(parse("{\"id\": 1, \"get\": 3}").is_err());

        let req = parse("{\"id\": 1, \"get\": [\"x\"]}").unwrap();
        assert!(req.get_handles().is_err());
    }
}
