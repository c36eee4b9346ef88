//! Handcrafted IR fixtures for tests.
//!
//! Builds packages and SSA functions instruction by instruction, mirroring
//! what the bridge emits for small Go programs. Available in test builds
//! and behind the `test-fixtures` feature.

use crate::ir::*;

/// Builds a `Package` with types, files, and functions.
pub struct PackageBuilder {
    pkg: Package,
    next_type: u32,
}

impl PackageBuilder {
    pub fn new(import_path: &str, name: &str) -> Self {
        Self {
            pkg: Package {
                import_path: import_path.into(),
                name: name.into(),
                ..Default::default()
            },
            next_type: 1,
        }
    }

    /// Define a named struct type and a pointer to it.
    /// Fields are `(name, qualified type name)` pairs; an embedded field
    /// uses its type's short name as the field name.
    /// Returns `(struct_type_id, pointer_type_id)`.
    pub fn struct_type(&mut self, qualified: &str, fields: &[(&str, &str)]) -> (u32, u32) {
        let defs = fields
            .iter()
            .enumerate()
            .map(|(i, (name, type_name))| FieldDef {
                name: (*name).into(),
                type_name: (*type_name).into(),
                embedded: false,
                span: Some(Span::new("types.go", 2 + i as u32, 2)),
            })
            .collect();
        self.struct_type_full(qualified, defs)
    }

    pub fn struct_type_full(&mut self, qualified: &str, fields: Vec<FieldDef>) -> (u32, u32) {
        let struct_id = self.next_type;
        let ptr_id = self.next_type + 1;
        self.next_type += 2;

        self.pkg.types.push(TypeRef {
            id: struct_id,
            kind: TypeKind::Struct,
            name: qualified.into(),
            fields,
            ..Default::default()
        });
        self.pkg.types.push(TypeRef {
            id: ptr_id,
            kind: TypeKind::Pointer,
            elem: struct_id,
            ..Default::default()
        });
        (struct_id, ptr_id)
    }

    pub fn file(&mut self, path: &str, comments: &[(u32, &str)]) -> &mut Self {
        self.pkg.files.push(FileInfo {
            path: path.into(),
            comments: comments
                .iter()
                .map(|(line, text)| CommentLine {
                    line: *line,
                    text: (*text).into(),
                })
                .collect(),
        });
        self
    }

    pub fn func(&mut self, func: Function) -> &mut Self {
        self.pkg.functions.push(func);
        self
    }

    pub fn build(self) -> Package {
        self.pkg
    }
}

/// Builds one SSA function block by block.
pub struct FuncBuilder {
    func: Function,
    next_id: u32,
    current: usize,
}

impl FuncBuilder {
    pub fn new(name: &str, file: &str, decl_line: u32) -> Self {
        let short_name: String = name
            .rsplit('.')
            .next()
            .unwrap_or(name)
            .trim_end_matches(')')
            .into();
        let is_exported = short_name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
        Self {
            func: Function {
                name: name.into(),
                short_name,
                span: Some(Span {
                    file: file.into(),
                    start_line: decl_line,
                    start_col: 1,
                    end_line: decl_line + 8,
                    end_col: 1,
                }),
                blocks: vec![BasicBlock {
                    id: 0,
                    name: "entry".into(),
                    ..Default::default()
                }],
                is_exported,
                ..Default::default()
            },
            next_id: 0,
            current: 0,
        }
    }

    pub fn method(mut self) -> Self {
        self.func.is_method = true;
        self
    }

    pub fn results(mut self, names: &[&str]) -> Self {
        self.func.result_type_names = names.iter().map(|s| (*s).into()).collect();
        self
    }

    pub fn sig_params(mut self, params: &[(&str, &str)]) -> Self {
        self.func.params = params
            .iter()
            .map(|(name, type_name)| Variable {
                name: (*name).into(),
                type_name: (*type_name).into(),
                span: None,
            })
            .collect();
        self
    }

    /// Start a new block and make it current.
    pub fn new_block(&mut self) -> u32 {
        let id = self.func.blocks.len() as u32;
        self.func.blocks.push(BasicBlock {
            id,
            ..Default::default()
        });
        self.current = self.func.blocks.len() - 1;
        id
    }

    /// Switch the current block for subsequent instructions.
    pub fn select_block(&mut self, id: u32) {
        self.current = self
            .func
            .blocks
            .iter()
            .position(|b| b.id == id)
            .unwrap_or(self.current);
    }

    pub fn edge(&mut self, from: u32, to: u32) -> &mut Self {
        self.func.cfg_edges.push(CfgEdge {
            from_block: from,
            to_block: to,
        });
        self
    }

    fn push(&mut self, mut instr: Instruction) -> u32 {
        self.next_id += 1;
        instr.id = self.next_id;
        instr.name = format!("t{}", self.next_id);
        let id = instr.id;
        self.func.blocks[self.current].instructions.push(instr);
        id
    }

    fn span(file: &str, line: u32) -> Option<Span> {
        Some(Span::new(file, line, 2))
    }

    fn file(&self) -> String {
        self.func
            .span
            .as_ref()
            .map(|s| s.file.clone())
            .unwrap_or_default()
    }

    pub fn param(&mut self, type_id: u32) -> u32 {
        self.push(Instruction {
            kind: ValueKind::Parameter,
            type_id,
            ..Default::default()
        })
    }

    pub fn alloc(&mut self, type_id: u32, line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Alloc,
            type_id,
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    pub fn field_addr(&mut self, base: u32, field_index: u32, line: u32) -> u32 {
        self.field_addr_typed(base, field_index, 0, line)
    }

    /// Field address with an explicit result type, needed when the result
    /// itself serves as the base of a nested field address.
    pub fn field_addr_typed(&mut self, base: u32, field_index: u32, type_id: u32, line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::FieldAddr,
            operands: vec![base],
            field_index,
            type_id,
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    pub fn index_addr(&mut self, base: u32, index: u32, line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::IndexAddr,
            operands: vec![base, index],
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    pub fn load(&mut self, addr: u32, line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Load,
            operands: vec![addr],
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    /// Load with an explicit result type, for pointer loads whose result
    /// feeds further field addressing.
    pub fn load_typed(&mut self, addr: u32, type_id: u32, line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Load,
            operands: vec![addr],
            type_id,
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    pub fn store(&mut self, addr: u32, value: u32, line: u32) {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Store,
            operands: vec![addr, value],
            span: Self::span(&file, line),
            ..Default::default()
        });
    }

    pub fn map_update(&mut self, map: u32, key: u32, value: u32, line: u32) {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::MapUpdate,
            operands: vec![map, key, value],
            span: Self::span(&file, line),
            ..Default::default()
        });
    }

    pub fn call(&mut self, callee: &str, operands: &[u32], line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Call,
            operands: operands.to_vec(),
            callee: Some(callee.into()),
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    /// An interface-dispatched call.
    pub fn call_iface(&mut self, callee: &str, operands: &[u32], line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Call,
            operands: operands.to_vec(),
            callee: Some(callee.into()),
            callee_is_interface: true,
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    pub fn defer_call(&mut self, callee: &str, operands: &[u32], line: u32) {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Defer,
            operands: operands.to_vec(),
            callee: Some(callee.into()),
            span: Self::span(&file, line),
            ..Default::default()
        });
    }

    pub fn go_stmt(&mut self, target: &str, line: u32) {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Go,
            callee: Some(target.into()),
            span: Self::span(&file, line),
            ..Default::default()
        });
    }

    pub fn ret(&mut self, line: u32) {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Return,
            span: Self::span(&file, line),
            ..Default::default()
        });
    }

    /// An opaque value with no analysis meaning (e.g. a constant).
    pub fn value(&mut self, line: u32) -> u32 {
        let file = self.file();
        self.push(Instruction {
            kind: ValueKind::Unknown,
            span: Self::span(&file, line),
            ..Default::default()
        })
    }

    pub fn phi(&mut self, edges: &[u32], type_id: u32) -> u32 {
        self.push(Instruction {
            kind: ValueKind::Phi,
            operands: edges.to_vec(),
            type_id,
            ..Default::default()
        })
    }

    pub fn build(self) -> Function {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_well_formed_function() {
        let mut pkg = PackageBuilder::new("example.com/p", "p");
        let (_, counter_ptr) = pkg.struct_type(
            "example.com/p.Counter",
            &[("mu", "sync.Mutex"), ("count", "int")],
        );

        let mut f = FuncBuilder::new("(*example.com/p.Counter).Inc", "counter.go", 10).method();
        let recv = f.param(counter_ptr);
        let mu = f.field_addr(recv, 0, 11);
        f.call("(*sync.Mutex).Lock", &[mu], 11);
        let count = f.field_addr(recv, 1, 12);
        let v = f.value(12);
        f.store(count, v, 12);
        f.call("(*sync.Mutex).Unlock", &[mu], 13);
        f.ret(14);
        pkg.func(f.build());

        let pkg = pkg.build();
        let func = &pkg.functions[0];
        assert_eq!(func.short_name, "Inc");
        assert!(func.is_method);
        assert_eq!(func.blocks[0].instructions.len(), 8);
        assert_eq!(func.return_count(), 1);

        // IDs are unique and operands resolve.
        let values = func.value_map();
        assert_eq!(values.len(), 8);
        let store = func
            .blocks[0]
            .instructions
            .iter()
            .find(|i| i.kind == ValueKind::Store)
            .unwrap();
        assert!(values.contains_key(&store.operands[0]));
    }

    #[test]
    fn test_builder_blocks_and_edges() {
        let mut f = FuncBuilder::new("p.branchy", "b.go", 1);
        f.ret(2); // entry return placeholder
        let b1 = f.new_block();
        f.ret(5);
        let b2 = f.new_block();
        f.ret(8);
        f.edge(0, b1).edge(0, b2);

        let func = f.build();
        assert_eq!(func.blocks.len(), 3);
        assert_eq!(func.cfg_edges.len(), 2);
        assert_eq!(func.return_count(), 3);
    }
}
