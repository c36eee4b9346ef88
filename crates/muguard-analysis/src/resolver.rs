//! Lock-reference resolution.
//!
//! Traces IR values back to their origin so that two syntactic uses of the
//! same logical variable resolve to the same canonical base. Closures lift
//! captured variables to heap cells, making every use a distinct load;
//! loops merge values through phi nodes. Both are peeled here.

use crate::config::MutexConfig;
use crate::lock_state::LockRef;
use muguard_ir::ir::{Function, Instruction, TypeRef, ValueKind};
use muguard_ir::types::TypeMap;
use std::collections::{HashMap, HashSet};

/// A resolved non-mutex field access.
#[derive(Debug, Clone)]
pub struct FieldAccess {
    /// Canonical base value of the struct pointer.
    pub base: u32,
    pub field_index: u32,
    /// Qualified struct type name.
    pub struct_name: String,
}

/// Value resolution over one function.
pub struct Resolver<'a> {
    values: HashMap<u32, &'a Instruction>,
    types: &'a TypeMap,
    mutex: &'a MutexConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(func: &'a Function, types: &'a TypeMap, mutex: &'a MutexConfig) -> Self {
        Self {
            values: func.value_map(),
            types,
            mutex,
        }
    }

    pub fn value(&self, id: u32) -> Option<&'a Instruction> {
        self.values.get(&id).copied()
    }

    /// Strip phi nodes whose incoming edges all resolve to the same value.
    /// A divergent phi resolves to itself: over-conservative "different"
    /// references, never an unsound equivalence.
    pub fn unwrap_value(&self, id: u32) -> u32 {
        let mut visited = HashSet::new();
        self.unwrap_value_visited(id, &mut visited)
    }

    fn unwrap_value_visited(&self, id: u32, visited: &mut HashSet<u32>) -> u32 {
        let Some(instr) = self.value(id) else {
            return id;
        };
        if instr.kind != ValueKind::Phi {
            return id;
        }
        match self.resolve_phi_if_uniform(instr, visited) {
            Some(resolved) => resolved,
            None => id,
        }
    }

    /// The single unique value behind a phi if all edges agree, or `None`.
    /// The visited set short-circuits phi cycles (loops) to a non-result.
    fn resolve_phi_if_uniform(&self, phi: &Instruction, visited: &mut HashSet<u32>) -> Option<u32> {
        if !visited.insert(phi.id) {
            return None;
        }
        let mut unique: Option<u32> = None;
        for &edge in &phi.operands {
            let resolved = self.unwrap_value_visited(edge, visited);
            match unique {
                None => unique = Some(resolved),
                Some(u) if u != resolved => return None,
                _ => {}
            }
        }
        unique
    }

    /// Canonical base for a lock reference: unwrap phis, then peel load
    /// chains down to the underlying cell. A seen set guards against
    /// malformed operand cycles.
    pub fn canonical_base(&self, id: u32) -> u32 {
        let mut current = self.unwrap_value(id);
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return current;
            }
            let Some(instr) = self.value(current) else {
                return current;
            };
            if instr.kind != ValueKind::Load || instr.operands.is_empty() {
                return current;
            }
            current = self.unwrap_value(instr.operands[0]);
        }
    }

    /// The struct definition behind a pointer-typed value, if any.
    fn struct_behind(&self, id: u32) -> Option<&TypeRef> {
        let instr = self.value(id)?;
        self.types.struct_of_pointer(instr.type_id)
    }

    /// Qualified struct type name behind a pointer-typed value.
    pub fn struct_name_of_value(&self, id: u32) -> Option<String> {
        let st = self.struct_behind(id)?;
        (!st.name.is_empty()).then(|| st.name.clone())
    }

    /// Resolve a value to a lock reference: a field address whose field is
    /// a recognized mutex type, with an in-range index.
    pub fn resolve_lock_ref(&self, id: u32) -> Option<LockRef> {
        let v = self.unwrap_value(id);
        let instr = self.value(v)?;
        if instr.kind != ValueKind::FieldAddr || instr.operands.is_empty() {
            return None;
        }
        let base_id = instr.operands[0];
        let st = self.struct_behind(base_id)?;
        let field = st.fields.get(instr.field_index as usize)?;
        if !self.mutex.is_mutex_type(&field.type_name) {
            return None;
        }
        Some(LockRef {
            base: self.canonical_base(base_id),
            field_index: instr.field_index,
        })
    }

    /// Wrapper-call fallback: the receiver is a pointer to a struct whose
    /// anonymous embedded field is a mutex. Shared-mode methods require
    /// the embedded field to be the dual-mode type.
    pub fn resolve_embedded_mutex(&self, recv_id: u32, method_name: &str) -> Option<LockRef> {
        let recv = self.unwrap_value(recv_id);
        let st = self.struct_behind(recv)?;
        for (i, field) in st.fields.iter().enumerate() {
            if !field.embedded || !self.mutex.is_mutex_type(&field.type_name) {
                continue;
            }
            if self.mutex.is_shared_method(method_name)
                && !self.mutex.is_dual_mode_type(&field.type_name)
            {
                continue;
            }
            return Some(LockRef {
                base: self.canonical_base(recv),
                field_index: i as u32,
            });
        }
        None
    }

    /// True if the lock/unlock method is valid for the mutex field's type:
    /// shared-mode methods need the dual-mode mutex.
    pub fn mode_valid_for(&self, lock: &LockRef, method_name: &str) -> bool {
        if !self.mutex.is_shared_method(method_name) {
            return true;
        }
        let Some(st) = self.struct_behind_lock(lock) else {
            return false;
        };
        st.fields
            .get(lock.field_index as usize)
            .is_some_and(|f| self.mutex.is_dual_mode_type(&f.type_name))
    }

    fn struct_behind_lock(&self, lock: &LockRef) -> Option<&TypeRef> {
        self.struct_behind(lock.base)
    }

    /// Resolve a value to a field access: a field address on a named
    /// struct. Mutex fields and out-of-range indices yield `None`.
    pub fn resolve_field_access(&self, id: u32) -> Option<FieldAccess> {
        let v = self.unwrap_value(id);
        let instr = self.value(v)?;
        if instr.kind != ValueKind::FieldAddr || instr.operands.is_empty() {
            return None;
        }
        let base_id = instr.operands[0];
        let st = self.struct_behind(base_id)?;
        if st.name.is_empty() {
            return None;
        }
        let field = st.fields.get(instr.field_index as usize)?;
        if self.mutex.is_mutex_type(&field.type_name) {
            return None;
        }
        Some(FieldAccess {
            base: self.canonical_base(base_id),
            field_index: instr.field_index,
            struct_name: st.name.clone(),
        })
    }

    /// The field-address instruction a value resolves to, for walking up
    /// ancestor chains.
    pub fn as_field_addr(&self, id: u32) -> Option<&'a Instruction> {
        let v = self.unwrap_value(id);
        let instr = self.value(v)?;
        (instr.kind == ValueKind::FieldAddr).then_some(instr)
    }

    /// Normalize a function-local lock reference to its type-scoped class.
    pub fn mutex_field_key(&self, lock: &LockRef) -> Option<crate::context::MutexFieldKey> {
        let struct_name = self.struct_name_of_value(lock.base)?;
        Some(crate::context::MutexFieldKey {
            struct_name,
            field_index: lock.field_index,
        })
    }

    /// Display name for diagnostics: `Registry.mu`.
    pub fn lock_display(&self, lock: &LockRef) -> Option<String> {
        let st = self.struct_behind(lock.base)?;
        let field = st.fields.get(lock.field_index as usize)?;
        Some(format!("{}.{}", st.short_name(), field.name))
    }

    /// Bare field name for diagnostics: `mu`.
    pub fn lock_field_name(&self, lock: &LockRef) -> Option<String> {
        let st = self.struct_behind(lock.base)?;
        Some(st.fields.get(lock.field_index as usize)?.name.clone())
    }
}
