//! Owned IR for Go mutex analysis.
//!
//! These types mirror the JSON produced by the Go bridge: one SSA-like
//! function per source function, with basic blocks, value-producing
//! instructions, struct-aware type information, and raw file comments.
//! All analysis passes consume this representation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root type — complete analysis input from the Go bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub packages: Vec<Package>,
    #[serde(default)]
    pub go_version: String,
    #[serde(default)]
    pub bridge_version: String,
}

/// A Go package with full SSA IR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Package {
    pub import_path: String,
    pub name: String,
    #[serde(default)]
    pub files: Vec<FileInfo>,
    #[serde(default)]
    pub types: Vec<TypeRef>,
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl Package {
    /// True if the qualified name (`pkg/path.Name` or `(*pkg/path.Name)`)
    /// belongs to this package.
    pub fn defines(&self, qualified: &str) -> bool {
        let trimmed = qualified.trim_start_matches("(*").trim_start_matches('(');
        trimmed.starts_with(&format!("{}.", self.import_path))
    }
}

/// File-level metadata. Comments are carried verbatim so directive
/// scanning does not need the source text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    #[serde(default)]
    pub comments: Vec<CommentLine>,
}

/// A single comment line with its 1-based source line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentLine {
    pub line: u32,
    pub text: String,
}

/// Type reference with unique per-package ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRef {
    pub id: u32,
    pub kind: TypeKind,
    /// Qualified name for named types (e.g. `example.com/registry.Registry`,
    /// `sync.RWMutex`); empty for anonymous composites.
    #[serde(default)]
    pub name: String,
    /// Pointee type ID for pointers, element type for slices/maps.
    #[serde(default)]
    pub elem: u32,
    /// Underlying type ID for named types.
    #[serde(default)]
    pub underlying: u32,
    /// Struct fields, populated for struct types.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl TypeRef {
    /// Unqualified name: `sync.RWMutex` → `RWMutex`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// True for named types whose unqualified name is exported (Go rules).
    pub fn is_exported(&self) -> bool {
        self.short_name()
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypeKind {
    Basic,
    Named,
    Pointer,
    Slice,
    Array,
    Map,
    Chan,
    Struct,
    Interface,
    Signature,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A struct field definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Qualified type name of the field (e.g. `sync.Mutex`, `int`,
    /// `example.com/registry.state`).
    pub type_name: String,
    /// True for anonymous (embedded) fields.
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub span: Option<Span>,
}

impl FieldDef {
    pub fn is_exported(&self) -> bool {
        self.name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
    }
}

/// Source location span. Lines and columns are 1-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub end_col: u32,
}

impl Span {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            start_line: line,
            start_col: col,
            end_line: line,
            end_col: col,
        }
    }

    /// Ordering key within a single file (line, then column).
    pub fn pos_key(&self) -> (u32, u32) {
        (self.start_line, self.start_col)
    }
}

/// A named value (parameter or free variable).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub span: Option<Span>,
}

/// SSA instruction. Every value-producing instruction has a function-unique
/// `id`; operands reference those IDs.
///
/// Operand conventions by kind:
/// - `FieldAddr`: `[base]`, with `field_index` set
/// - `IndexAddr`: `[collection, index]`
/// - `Load`: `[addr]`
/// - `Store`: `[addr, value]`
/// - `MapUpdate`: `[map, key, value]`
/// - `Phi`: incoming values, one per predecessor edge
/// - `Call` / `Go` / `Defer`: arguments, receiver first for method calls
/// - `Return`: result values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub id: u32,
    pub kind: ValueKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub type_id: u32,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub operands: Vec<u32>,
    /// Field index for `FieldAddr`.
    #[serde(default)]
    pub field_index: u32,
    /// Qualified callee for `Call`/`Go`/`Defer`
    /// (e.g. `(*sync.Mutex).Lock`, `example.com/registry.helper`).
    #[serde(default)]
    pub callee: Option<String>,
    #[serde(default)]
    pub callee_is_interface: bool,
    /// Qualified names of functions passed as value arguments
    /// (handler registration, `go` closures).
    #[serde(default)]
    pub func_args: Vec<String>,
}

impl Default for Instruction {
    fn default() -> Self {
        Self {
            id: 0,
            kind: ValueKind::Unknown,
            name: String::new(),
            type_id: 0,
            span: None,
            operands: Vec::new(),
            field_index: 0,
            callee: None,
            callee_is_interface: false,
            func_args: Vec::new(),
        }
    }
}

impl Instruction {
    /// Unqualified method name of the callee:
    /// `(*sync.RWMutex).RLock` → `RLock`.
    pub fn callee_method_name(&self) -> Option<&str> {
        let callee = self.callee.as_deref()?;
        callee.rsplit('.').next().map(|s| s.trim_end_matches(')'))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueKind {
    Parameter,
    FreeVar,
    Global,
    Alloc,
    FieldAddr,
    IndexAddr,
    Call,
    Phi,
    Load,
    Store,
    MapUpdate,
    MakeClosure,
    Return,
    If,
    Jump,
    Go,
    Defer,
    #[default]
    #[serde(other)]
    Unknown,
}

/// CFG edge between basic blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from_block: u32,
    pub to_block: u32,
}

/// SSA basic block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

/// SSA function with full CFG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Function {
    /// Qualified name (`example.com/registry.Get`,
    /// `(*example.com/registry.Registry).Inc`, closures with `$n` suffixes).
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub blocks: Vec<BasicBlock>,
    #[serde(default)]
    pub cfg_edges: Vec<CfgEdge>,
    /// Parameters, excluding the receiver.
    #[serde(default)]
    pub params: Vec<Variable>,
    /// Qualified result type names; pointers carry a leading `*`.
    #[serde(default)]
    pub result_type_names: Vec<String>,
    #[serde(default)]
    pub is_method: bool,
    #[serde(default)]
    pub is_exported: bool,
}

impl Function {
    /// Index of all value-producing instructions by ID.
    pub fn value_map(&self) -> HashMap<u32, &Instruction> {
        let mut map = HashMap::new();
        for block in &self.blocks {
            for instr in &block.instructions {
                map.insert(instr.id, instr);
            }
        }
        map
    }

    /// All instructions of a given kind, in block order.
    pub fn instructions_of(&self, kind: &ValueKind) -> Vec<&Instruction> {
        self.blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .filter(|i| &i.kind == kind)
            .collect()
    }

    /// Number of `Return` instructions.
    pub fn return_count(&self) -> usize {
        self.instructions_of(&ValueKind::Return).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_analysis_input() {
        let json = r#"{
            "packages": [{
                "import_path": "example.com/pkg",
                "name": "pkg",
                "files": [{"path": "main.go", "comments": [{"line": 3, "text": "// mu:ignore"}]}],
                "types": [{"id": 1, "kind": "Struct", "name": "example.com/pkg.Counter",
                           "fields": [{"name": "mu", "type_name": "sync.Mutex"},
                                      {"name": "count", "type_name": "int"}]}],
                "functions": [{
                    "name": "example.com/pkg.Hello",
                    "short_name": "Hello",
                    "blocks": [{"id": 0, "instructions": []}],
                    "is_exported": true
                }]
            }],
            "go_version": "1.26"
        }"#;

        let input: AnalysisInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.packages.len(), 1);
        let pkg = &input.packages[0];
        assert_eq!(pkg.name, "pkg");
        assert_eq!(pkg.types[0].fields[0].type_name, "sync.Mutex");
        assert_eq!(pkg.files[0].comments[0].line, 3);
        assert!(pkg.functions[0].is_exported);
    }

    #[test]
    fn test_package_defines() {
        let pkg = Package {
            import_path: "example.com/registry".into(),
            name: "registry".into(),
            ..Default::default()
        };
        assert!(pkg.defines("example.com/registry.Registry"));
        assert!(pkg.defines("(*example.com/registry.Registry).Inc"));
        assert!(!pkg.defines("sync.Mutex"));
        assert!(!pkg.defines("example.com/registryx.Other"));
    }

    #[test]
    fn test_type_ref_exported() {
        let t = TypeRef {
            name: "example.com/pkg.Counter".into(),
            ..Default::default()
        };
        assert_eq!(t.short_name(), "Counter");
        assert!(t.is_exported());

        let hidden = TypeRef {
            name: "example.com/pkg.counter".into(),
            ..Default::default()
        };
        assert!(!hidden.is_exported());
    }

    #[test]
    fn test_callee_method_name() {
        let instr = Instruction {
            kind: ValueKind::Call,
            callee: Some("(*sync.RWMutex).RLock".into()),
            ..Default::default()
        };
        assert_eq!(instr.callee_method_name(), Some("RLock"));

        let plain = Instruction {
            kind: ValueKind::Call,
            callee: Some("example.com/pkg.helper".into()),
            ..Default::default()
        };
        assert_eq!(plain.callee_method_name(), Some("helper"));
    }

    #[test]
    fn test_span_pos_key_ordering() {
        let a = Span::new("f.go", 4, 2);
        let b = Span::new("f.go", 4, 9);
        let c = Span::new("f.go", 7, 1);
        assert!(a.pos_key() < b.pos_key());
        assert!(b.pos_key() < c.pos_key());
    }

    #[test]
    fn test_value_map_and_return_count() {
        let func = Function {
            name: "pkg.f".into(),
            short_name: "f".into(),
            blocks: vec![
                BasicBlock {
                    id: 0,
                    instructions: vec![
                        Instruction {
                            id: 1,
                            kind: ValueKind::Alloc,
                            ..Default::default()
                        },
                        Instruction {
                            id: 2,
                            kind: ValueKind::Return,
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
                BasicBlock {
                    id: 1,
                    instructions: vec![Instruction {
                        id: 3,
                        kind: ValueKind::Return,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let values = func.value_map();
        assert_eq!(values[&1].kind, ValueKind::Alloc);
        assert_eq!(func.return_count(), 2);
    }

    #[test]
    fn test_unknown_kinds_tolerated() {
        let json = r#"{"id": 9, "kind": "Select"}"#;
        let instr: Instruction = serde_json::from_str(json).unwrap();
        assert_eq!(instr.kind, ValueKind::Unknown);

        let json = r#"{"id": 2, "kind": "Tuple"}"#;
        let t: TypeRef = serde_json::from_str(json).unwrap();
        assert_eq!(t.kind, TypeKind::Unknown);
    }
}
