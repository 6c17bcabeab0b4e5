//! Top-level request execution.
//!
//! [`Engine::run_request`] drives one request end to end: parse the frame,
//! apply `set`, run the commands in order (stopping at the first failure),
//! fetch the `get` values, destroy the `destroy` handles, and emit the
//! response. The `destroy` list is honored even when an earlier step
//! failed, so the host's cleanup plan holds; the response keeps the first
//! error either way.

use crate::dispatch::{CallContext, Registry};
use crate::host::MessageSink;
use crate::request::Request;
use crate::response::Response;
use cbind_core::{HandleTable, HandleValue, MessageQueue, VarArray, Variant};
use std::sync::Arc;

/// References kept alive past their handles by `var_add_ref`.
#[derive(Debug, Default)]
pub struct RetainSet {
    items: Vec<Variant>,
}

impl RetainSet {
    /// Create an empty retain set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold an extra reference to `var`.
    pub fn retain(&mut self, var: Variant) {
        self.items.push(var);
    }

    /// Drop one held reference to `var` (matched by identity). Returns
    /// false when none is held.
    pub fn release(&mut self, var: &Variant) -> bool {
        match self.items.iter().position(|held| held.ptr_eq(var)) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of held references.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Worker-owned execution state: the handle table plus the retain set.
#[derive(Debug, Default)]
pub struct Engine {
    table: HandleTable,
    retained: RetainSet,
}

/// Variant emitted for a `get` of a handle, chosen by the handle's tag.
fn value_to_variant(value: &HandleValue) -> Variant {
    match value {
        HandleValue::Int8(v) => Variant::Int32(*v as i32),
        HandleValue::Uint8(v) => Variant::Int32(*v as i32),
        HandleValue::Int16(v) => Variant::Int32(*v as i32),
        HandleValue::Uint16(v) => Variant::Int32(*v as i32),
        HandleValue::Int32(v) => Variant::Int32(*v),
        HandleValue::Uint32(v) => {
            if *v <= i32::MAX as u32 {
                Variant::Int32(*v as i32)
            } else {
                Variant::Double(*v as f64)
            }
        }
        HandleValue::Int64(v) => Variant::Int64(*v),
        HandleValue::Uint64(v) => Variant::Int64(*v as i64),
        HandleValue::Float(v) => Variant::Double(*v as f64),
        HandleValue::Double(v) => Variant::Double(*v),
        // Addresses surface as host numbers.
        HandleValue::VoidPtr(p) => Variant::Double(*p as usize as f64),
        HandleValue::FuncPtr(p) => Variant::Double(*p as usize as f64),
        HandleValue::Var(v) => v.clone(),
        HandleValue::FuncId(id) => Variant::Array(
            [Variant::from_utf8("function"), Variant::Int32(*id)]
                .into_iter()
                .collect::<VarArray>(),
        ),
    }
}

impl Engine {
    /// Create an engine with an empty handle table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle table.
    pub fn table(&self) -> &HandleTable {
        &self.table
    }

    /// The handle table, mutably.
    pub fn table_mut(&mut self) -> &mut HandleTable {
        &mut self.table
    }

    /// Number of live handles; zero when the host has cleaned up.
    pub fn live_handle_count(&self) -> usize {
        self.table.live_count()
    }

    /// Number of references held by `var_add_ref`.
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Execute one request and produce its response variant.
    pub fn run_request(
        &mut self,
        registry: &Registry,
        queue: &MessageQueue,
        sink: &Arc<dyn MessageSink>,
        request_var: &Variant,
    ) -> Variant {
        let request = match Request::parse(request_var) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(error = %err, "request rejected");
                // Best-effort correlation id for the error response.
                let id = request_var
                    .as_dictionary()
                    .and_then(|dict| dict.get("id").as_int32())
                    .unwrap_or(0);
                let mut response = Response::new(id);
                response.set_error(err.to_string());
                return response.into_variant();
            }
        };

        tracing::debug!(id = request.id(), commands = request.command_count(), "running request");
        let mut response = Response::new(request.id());

        if let Err(err) = request.apply_set(&mut self.table) {
            response.set_error(err.to_string());
        }

        if !response.has_error() {
            for index in 0..request.command_count() {
                let mut ctx = CallContext::new(
                    &mut self.table,
                    &mut self.retained,
                    queue,
                    sink,
                    &request,
                    index,
                );
                if let Err(err) = registry.run_command(&mut ctx) {
                    tracing::debug!(command = index, error = %err, "command failed");
                    response.set_error(err.to_string());
                    break;
                }
            }
        }

        if !response.has_error() {
            match request.get_handles() {
                Ok(handles) => {
                    for handle in handles {
                        match self.table.value(handle) {
                            Ok(value) => response.push_value(value_to_variant(value)),
                            Err(err) => {
                                response.set_error(err.to_string());
                                break;
                            }
                        }
                    }
                }
                Err(err) => response.set_error(err.to_string()),
            }
        }

        match request.destroy_handles() {
            Ok(handles) => {
                if let Err(err) = self.table.destroy_many(&handles) {
                    response.set_error(err.to_string());
                }
            }
            Err(err) => response.set_error(err.to_string()),
        }

        response.into_variant()
    }
}
