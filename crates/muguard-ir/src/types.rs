//! Type lookup helpers for working with Go types from bridge data.

use crate::ir::{FieldDef, Package, TypeKind, TypeRef};
use std::collections::HashMap;

/// Type lookup table for a package.
pub struct TypeMap {
    types: HashMap<u32, TypeRef>,
    by_name: HashMap<String, u32>,
}

impl TypeMap {
    pub fn from_package(pkg: &Package) -> Self {
        let types: HashMap<u32, TypeRef> = pkg.types.iter().map(|t| (t.id, t.clone())).collect();
        let by_name = pkg
            .types
            .iter()
            .filter(|t| !t.name.is_empty())
            .map(|t| (t.name.clone(), t.id))
            .collect();
        Self { types, by_name }
    }

    pub fn get(&self, id: u32) -> Option<&TypeRef> {
        self.types.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&TypeRef> {
        self.by_name.get(name).and_then(|id| self.types.get(id))
    }

    pub fn is_pointer(&self, id: u32) -> bool {
        self.types
            .get(&id)
            .map(|t| t.kind == TypeKind::Pointer)
            .unwrap_or(false)
    }

    /// Pointee type for pointers.
    pub fn pointee(&self, id: u32) -> Option<&TypeRef> {
        let t = self.types.get(&id)?;
        if t.kind != TypeKind::Pointer {
            return None;
        }
        self.types.get(&t.elem)
    }

    /// Resolve a type to its struct definition, following named-type
    /// underlying links. Returns the TypeRef that carries `fields`.
    pub fn struct_def(&self, id: u32) -> Option<&TypeRef> {
        let mut t = self.types.get(&id)?;
        let mut hops = 0;
        while t.kind == TypeKind::Named && hops < 8 {
            t = self.types.get(&t.underlying)?;
            hops += 1;
        }
        (t.kind == TypeKind::Struct).then_some(t)
    }

    /// Struct definition behind a pointer type (`*T` → `T`'s struct).
    pub fn struct_of_pointer(&self, id: u32) -> Option<&TypeRef> {
        let t = self.types.get(&id)?;
        if t.kind != TypeKind::Pointer {
            return None;
        }
        self.struct_def(t.elem)
    }

    /// Field definition by struct type ID and field index.
    pub fn field(&self, struct_id: u32, index: u32) -> Option<&FieldDef> {
        self.struct_def(struct_id)?.fields.get(index as usize)
    }

    /// Field definition by qualified struct name and index.
    pub fn field_by_name(&self, struct_name: &str, index: u32) -> Option<&FieldDef> {
        self.by_name(struct_name)?.fields.get(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn make_type_map() -> TypeMap {
        let pkg = Package {
            import_path: "test".into(),
            name: "test".into(),
            types: vec![
                TypeRef {
                    id: 1,
                    kind: TypeKind::Struct,
                    name: "test.Counter".into(),
                    fields: vec![
                        FieldDef {
                            name: "mu".into(),
                            type_name: "sync.Mutex".into(),
                            ..Default::default()
                        },
                        FieldDef {
                            name: "count".into(),
                            type_name: "int".into(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
                TypeRef {
                    id: 2,
                    kind: TypeKind::Pointer,
                    elem: 1,
                    ..Default::default()
                },
                TypeRef {
                    id: 3,
                    kind: TypeKind::Basic,
                    name: "int".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        TypeMap::from_package(&pkg)
    }

    #[test]
    fn test_pointee_and_struct_resolution() {
        let tm = make_type_map();
        assert!(tm.is_pointer(2));
        assert_eq!(tm.pointee(2).unwrap().name, "test.Counter");
        assert_eq!(tm.struct_of_pointer(2).unwrap().name, "test.Counter");
        assert!(tm.struct_of_pointer(3).is_none());
        assert!(tm.pointee(1).is_none());
    }

    #[test]
    fn test_field_lookup() {
        let tm = make_type_map();
        assert_eq!(tm.field(1, 0).unwrap().type_name, "sync.Mutex");
        assert_eq!(tm.field(1, 1).unwrap().name, "count");
        assert!(tm.field(1, 5).is_none());
        assert_eq!(
            tm.field_by_name("test.Counter", 1).unwrap().name,
            "count"
        );
    }

    #[test]
    fn test_missing_type() {
        let tm = make_type_map();
        assert!(tm.get(99).is_none());
        assert!(tm.by_name("test.Nope").is_none());
    }
}
