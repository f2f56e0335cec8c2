// questscript Symbol Table
// Interns identifiers, labels and constants into stable integer ids
// shared across every compilation unit in one engine.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

pub type SymbolId = u32;

/// What a symbol currently denotes. Label symbols move monotonically
/// `Nop` -> `Label` -> `Pos` within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Plain name: a variable, or a label nobody referenced yet
    Nop,
    /// Integer constant
    Int,
    /// Read-only computed parameter
    Param,
    /// Built-in function; `value` holds the registry index
    BuiltinFunc,
    /// User function declared with `function NAME;` but no body yet
    UserFuncDecl,
    /// User function with a compiled body
    UserFunc,
    /// Label resolved to a bytecode offset
    Pos,
    /// Label referenced before its definition
    Label,
}

/// Storage class of a variable, resolved once from the name's sigil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    /// `.@name` - transient per-call-frame local
    CallLocal,
    /// `.name` - persistent on the owning NPC definition
    Npc,
    /// `'name` - per-running-instance scope
    Instance,
    /// `#name` - per-account
    Account,
    /// `##name` - per-account, shared across worlds
    AccountGlobal,
    /// bare `name` - per-character
    Character,
    /// `@name` - per-character, transient
    CharTemp,
    /// `$name` / `$@name` - process-wide global
    Global,
}

impl VarScope {
    /// Derive the scope from a (folded) identifier's leading sigil
    pub fn from_name(name: &str) -> VarScope {
        if name.starts_with("##") {
            VarScope::AccountGlobal
        } else if name.starts_with('#') {
            VarScope::Account
        } else if name.starts_with(".@") {
            VarScope::CallLocal
        } else if name.starts_with('.') {
            VarScope::Npc
        } else if name.starts_with('\'') {
            VarScope::Instance
        } else if name.starts_with('$') {
            VarScope::Global
        } else if name.starts_with('@') {
            VarScope::CharTemp
        } else {
            VarScope::Character
        }
    }
}

/// One interned symbol
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Original spelling, first one seen
    pub name: String,
    /// ASCII-lowercased name; lookup key and persistence key
    pub folded: Arc<str>,
    pub kind: SymbolKind,
    /// Resolved bytecode offset for labels and user functions
    pub pos: Option<u32>,
    /// Constant / parameter value, or builtin registry index
    pub value: i32,
    /// Code offsets of forward references awaiting this label
    pub backpatch: SmallVec<[u32; 4]>,
    pub deprecated: bool,
    pub scope: VarScope,
    /// `$`-suffixed names denote string-typed variables
    pub is_string: bool,
}

/// Case-insensitive interning table. Ids are stable for the lifetime of
/// the engine; growth never invalidates them.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    index: FxHashMap<Arc<str>, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the existing id if already present.
    /// Matching is ASCII case-insensitive; the first spelling wins.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        let folded_key = name.to_ascii_lowercase();
        if let Some(&id) = self.index.get(folded_key.as_str()) {
            return id;
        }

        let folded: Arc<str> = Arc::from(folded_key.as_str());
        let id = self.symbols.len() as SymbolId;
        self.symbols.push(Symbol {
            name: name.to_string(),
            folded: folded.clone(),
            kind: SymbolKind::Nop,
            pos: None,
            value: 0,
            backpatch: SmallVec::new(),
            deprecated: false,
            scope: VarScope::from_name(&folded),
            is_string: folded.ends_with('$'),
        });
        self.index.insert(folded, id);
        id
    }

    /// Read-only lookup
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let folded = name.to_ascii_lowercase();
        self.index.get(folded.as_str()).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (i as SymbolId, s))
    }

    /// Declare an integer constant. Fails if the name already denotes
    /// something other than a plain name or the same constant.
    pub fn declare_constant(
        &mut self,
        name: &str,
        value: i32,
        deprecated: bool,
    ) -> Result<SymbolId, String> {
        let id = self.intern(name);
        let sym = self.get_mut(id);
        match sym.kind {
            SymbolKind::Nop => {
                sym.kind = SymbolKind::Int;
                sym.value = value;
                sym.deprecated = deprecated;
                Ok(id)
            }
            SymbolKind::Int if sym.value == value => Ok(id),
            other => Err(format!(
                "'{}' already declared as {:?}, cannot redeclare as constant",
                name, other
            )),
        }
    }

    /// Declare a read-only computed parameter
    pub fn declare_parameter(&mut self, name: &str, value: i32) -> Result<SymbolId, String> {
        let id = self.intern(name);
        let sym = self.get_mut(id);
        match sym.kind {
            SymbolKind::Nop => {
                sym.kind = SymbolKind::Param;
                sym.value = value;
                Ok(id)
            }
            SymbolKind::Param if sym.value == value => Ok(id),
            other => Err(format!(
                "'{}' already declared as {:?}, cannot redeclare as parameter",
                name, other
            )),
        }
    }

    /// Declare a built-in function bound to a registry index
    pub fn declare_builtin(&mut self, name: &str, registry_index: i32) -> Result<SymbolId, String> {
        let id = self.intern(name);
        let sym = self.get_mut(id);
        match sym.kind {
            SymbolKind::Nop => {
                sym.kind = SymbolKind::BuiltinFunc;
                sym.value = registry_index;
                Ok(id)
            }
            SymbolKind::BuiltinFunc => Ok(id),
            other => Err(format!(
                "'{}' already declared as {:?}, cannot redeclare as builtin",
                name, other
            )),
        }
    }

    /// Record a forward-reference patch site for an unresolved label
    pub fn add_patch(&mut self, id: SymbolId, site: u32) {
        let sym = self.get_mut(id);
        if sym.kind == SymbolKind::Nop {
            sym.kind = SymbolKind::Label;
        }
        sym.backpatch.push(site);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_case_insensitive_and_stable() {
        let mut table = SymbolTable::new();
        let a = table.intern("OnInit");
        let b = table.intern("oninit");
        let c = table.intern("ONINIT");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(table.get(a).name, "OnInit");
        assert_eq!(&*table.get(a).folded, "oninit");
    }

    #[test]
    fn scope_derived_from_sigil() {
        let mut table = SymbolTable::new();
        let cases = [
            (".@tmp", VarScope::CallLocal),
            (".npcvar", VarScope::Npc),
            ("'inst", VarScope::Instance),
            ("##world$", VarScope::AccountGlobal),
            ("#bank", VarScope::Account),
            ("@chartemp", VarScope::CharTemp),
            ("$server", VarScope::Global),
            ("$@temp", VarScope::Global),
            ("quest_state", VarScope::Character),
        ];
        for (name, scope) in cases {
            let id = table.intern(name);
            assert_eq!(table.get(id).scope, scope, "{name}");
        }
        let world = table.intern("##world$");
        assert!(table.get(world).is_string);
        let bank = table.intern("#bank");
        assert!(!table.get(bank).is_string);
    }

    #[test]
    fn constant_conflicts_rejected() {
        let mut table = SymbolTable::new();
        table.declare_constant("MAX_LEVEL", 99, false).unwrap();
        // same value is idempotent
        table.declare_constant("max_level", 99, false).unwrap();
        assert!(table.declare_parameter("MAX_LEVEL", 1).is_err());
    }

    #[test]
    fn patch_list_marks_label_kind() {
        let mut table = SymbolTable::new();
        let id = table.intern("L_onwards");
        assert_eq!(table.get(id).kind, SymbolKind::Nop);
        table.add_patch(id, 40);
        table.add_patch(id, 80);
        assert_eq!(table.get(id).kind, SymbolKind::Label);
        assert_eq!(table.get(id).backpatch.as_slice(), &[40, 80]);
    }
}
