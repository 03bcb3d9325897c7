/* Symbol bodies and the table that owns them
 *
 * every global symbol the link knows about lives in one arena, identified
 * by a u32 index. resolution points duplicate names at a canonical body
 * through the repl index, so a relocation always lands on the definition
 * that won. local symbols stay inside their object files
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashMap;

use goblin::elf::sym::{ STT_FUNC, STT_GNU_IFUNC };

use super::input::{ ObjectFile, SecRef, SharedFile };
use super::config::Config;
use super::outsec::OutSecId;
use super::link::Out;

/* symbol visibility, from the st_other low bits */
pub const STV_DEFAULT: u8 = 0;
pub const STV_INTERNAL: u8 = 1;
pub const STV_HIDDEN: u8 = 2;
pub const STV_PROTECTED: u8 = 3;

/* index of a symbol in the arena */
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SymId(pub u32);

/* what a symbol actually is once resolution has run */
#[derive(Clone, Debug)]
pub enum SymbolBody
{
    /* referenced but not defined anywhere. can_keep marks references that
       are allowed to stay unresolved without an error */
    Undefined { can_keep: bool },

    /* defined at an offset inside an input section. a section of None is
       a file-scope absolute definition (SHN_ABS in the input) */
    DefinedRegular { section: Option<SecRef>, value: u64, size: u64 },

    /* a tentative definition waiting for a .bss slot */
    DefinedCommon { size: u64, max_align: u64, offset_in_bss: u64 },

    /* defined by a needed shared library. sec_align is the alignment of
       the section it lives in over there, used to size a copy-reloc slot */
    Shared { file: u32, value: u64, size: u64, sec_align: u64, offset_in_bss: u64 },

    /* synthesized by the linker at an offset inside an output section */
    DefinedSynthetic { section: OutSecId, value: u64 },

    /* synthesized by the linker at a fixed address */
    Absolute { value: u64 },

    /* a reserved name the linker decided means nothing in this link.
       resolves to zero and never reaches the output symbol tables */
    Ignored
}

pub struct Symbol
{
    pub name: String,
    pub body: SymbolBody,

    /* index of the body that replaced this one during resolution.
       points at itself when this body is canonical */
    pub repl: u32,

    pub st_type: u8,                    /* STT_* of the definition */
    pub visibility: u8,                 /* STV_* */
    pub is_weak: bool,
    pub is_tls: bool,

    pub used_in_regular_obj: bool,
    pub must_be_in_dynsym: bool,
    pub needs_copy_or_plt_addr: bool,

    /* slot indices handed out by the relocation scanner */
    pub got_index: Option<u32>,
    pub gotplt_index: Option<u32>,
    pub plt_index: Option<u32>,

    /* position in .dynsym once that table is finalized */
    pub dynsym_index: Option<u32>,

    /* first object file that referenced the symbol, for diagnostics */
    pub file: Option<u32>
}

impl Symbol
{
    pub fn is_undefined(&self) -> bool { matches!(self.body, SymbolBody::Undefined { .. }) }
    pub fn is_shared(&self) -> bool { matches!(self.body, SymbolBody::Shared { .. }) }
    pub fn is_common(&self) -> bool { matches!(self.body, SymbolBody::DefinedCommon { .. }) }
    pub fn is_func(&self) -> bool { self.st_type == STT_FUNC }
    pub fn is_gnu_ifunc(&self) -> bool { self.st_type == STT_GNU_IFUNC }
    pub fn is_in_got(&self) -> bool { self.got_index.is_some() }
    pub fn is_in_plt(&self) -> bool { self.plt_index.is_some() }

    /* a shared data symbol referenced directly from the executable gets
       its definition copied into .bss. functions get a plt address instead */
    pub fn needs_copy(&self) -> bool
    {
        self.is_shared() && self.needs_copy_or_plt_addr && self.is_func() == false
    }

    pub fn size(&self) -> u64
    {
        match &self.body
        {
            SymbolBody::DefinedRegular { size, .. } => *size,
            SymbolBody::DefinedCommon { size, .. } => *size,
            SymbolBody::Shared { size, .. } => *size,
            _ => 0
        }
    }
}

/* the resolved global symbols plus the input files they came from */
pub struct SymbolTable
{
    pub objects: Vec<ObjectFile>,
    pub shared: Vec<SharedFile>,
    pub symbols: Vec<Symbol>,
    names: HashMap<String, SymId>
}

impl SymbolTable
{
    pub fn new() -> SymbolTable
    {
        SymbolTable
        {
            objects: Vec::new(),
            shared: Vec::new(),
            symbols: Vec::new(),
            names: HashMap::new()
        }
    }

    pub fn add_object(&mut self, file: ObjectFile) -> u32
    {
        self.objects.push(file);
        (self.objects.len() - 1) as u32
    }

    pub fn add_shared(&mut self, file: SharedFile) -> u32
    {
        self.shared.push(file);
        (self.shared.len() - 1) as u32
    }

    pub fn find(&self, name: &str) -> Option<SymId>
    {
        self.names.get(name).copied()
    }

    /* look a name up, creating an undefined placeholder if it's new */
    pub fn insert(&mut self, name: &str) -> SymId
    {
        if let Some(id) = self.names.get(name)
        {
            return *id;
        }

        let id = SymId(self.symbols.len() as u32);
        self.symbols.push(Symbol
        {
            name: String::from(name),
            body: SymbolBody::Undefined { can_keep: false },
            repl: id.0,
            st_type: 0,
            visibility: STV_DEFAULT,
            is_weak: false,
            is_tls: false,
            used_in_regular_obj: false,
            must_be_in_dynsym: false,
            needs_copy_or_plt_addr: false,
            got_index: None,
            gotplt_index: None,
            plt_index: None,
            dynsym_index: None,
            file: None
        });
        self.names.insert(String::from(name), id);
        id
    }

    /* install a body for a name, replacing whatever resolution left there */
    pub fn define(&mut self, name: &str, body: SymbolBody) -> SymId
    {
        let id = self.insert(name);
        let canon = self.repl(id);
        self.symbols[canon.0 as usize].body = body;
        canon
    }

    /* the reserved-symbol passes use these. values are placeholders that
       the layout engine overwrites once addresses exist */
    pub fn add_absolute(&mut self, name: &str, value: u64) -> SymId
    {
        self.define(name, SymbolBody::Absolute { value })
    }

    pub fn add_synthetic(&mut self, name: &str, section: OutSecId, value: u64) -> SymId
    {
        self.define(name, SymbolBody::DefinedSynthetic { section, value })
    }

    pub fn add_ignored(&mut self, name: &str) -> SymId
    {
        self.define(name, SymbolBody::Ignored)
    }

    /* follow the replacement chain to the canonical body. chains are
       short and acyclic, so a read-only walk is fine */
    pub fn repl(&self, id: SymId) -> SymId
    {
        let mut cur = id;
        loop
        {
            let next = self.symbols[cur.0 as usize].repl;
            if next == cur.0
            {
                return cur;
            }
            cur = SymId(next);
        }
    }

    /* point a duplicate body at the one that won resolution */
    pub fn replace(&mut self, duplicate: SymId, winner: SymId)
    {
        self.symbols[duplicate.0 as usize].repl = winner.0;
    }

    pub fn get(&self, id: SymId) -> &Symbol { &self.symbols[id.0 as usize] }
    pub fn get_mut(&mut self, id: SymId) -> &mut Symbol { &mut self.symbols[id.0 as usize] }

    /* iterate over every canonical global */
    pub fn globals(&self) -> impl Iterator<Item = SymId> + '_
    {
        (0..self.symbols.len() as u32)
            .map(SymId)
            .filter(move |id| self.symbols[id.0 as usize].repl == id.0)
    }

    /* final virtual address of a symbol, valid once layout has run */
    pub fn symbol_va(&self, out: &Out, id: SymId) -> u64
    {
        let sym = self.get(self.repl(id));
        match &sym.body
        {
            SymbolBody::DefinedRegular { section: Some(sec), value, .. } =>
            {
                let insec = &self.objects[sec.file as usize].sections[sec.sec as usize];
                match insec.out_sec
                {
                    Some(osec) => out.section(osec).va + insec.out_off
                                  + out.section(osec).merge_offset(*sec, *value),
                    None => 0
                }
            },
            SymbolBody::DefinedRegular { section: None, value, .. } => *value,
            SymbolBody::DefinedSynthetic { section, value } => out.section(*section).va + *value,
            SymbolBody::DefinedCommon { offset_in_bss, .. } => match out.bss
            {
                Some(bss) => out.section(bss).va + *offset_in_bss,
                None => 0
            },
            SymbolBody::Shared { offset_in_bss, .. } =>
            {
                if sym.needs_copy()
                {
                    match out.bss
                    {
                        Some(bss) => out.section(bss).va + *offset_in_bss,
                        None => 0
                    }
                }
                else
                {
                    0
                }
            },
            SymbolBody::Absolute { value } => *value,
            SymbolBody::Undefined { .. } | SymbolBody::Ignored => 0
        }
    }
}

/* can the dynamic linker substitute another module's definition at load
   time? local (absent) symbols never; hidden visibility never; shared and
   plain undefined symbols always; otherwise only position-independent
   output leaves globals open to preemption */
pub fn can_be_preempted(config: &Config, symtab: &SymbolTable, body: Option<SymId>) -> bool
{
    let id = match body
    {
        Some(id) => id,
        None => return false
    };
    let sym = symtab.get(symtab.repl(id));

    if sym.is_shared()
    {
        return true;
    }
    if sym.is_undefined() && sym.is_weak == false
    {
        return true;
    }
    if config.shared == false
    {
        return false;
    }
    sym.visibility == STV_DEFAULT
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::config::default_config;

    #[test]
    fn insert_is_idempotent()
    {
        let mut tab = SymbolTable::new();
        let a = tab.insert("main");
        let b = tab.insert("main");
        assert_eq!(a, b);
        assert_eq!(tab.symbols.len(), 1);
    }

    #[test]
    fn repl_chains_reach_the_winner()
    {
        let mut tab = SymbolTable::new();
        let dup = tab.insert("printf");
        let dup2 = tab.insert("printf_weak_alias");
        let winner = tab.add_absolute("printf_impl", 0x1000);
        tab.replace(dup, dup2);
        tab.replace(dup2, winner);
        assert_eq!(tab.repl(dup), winner);
    }

    #[test]
    fn preemption_rules()
    {
        let mut config = default_config();
        let mut tab = SymbolTable::new();

        /* a local (absent) symbol is never preemptible */
        assert_eq!(can_be_preempted(&config, &tab, None), false);

        /* an undefined non-weak reference is */
        let undef = tab.insert("puts");
        assert_eq!(can_be_preempted(&config, &tab, Some(undef)), true);

        /* a regular definition is fixed in an executable but open in a DSO */
        let def = tab.define("local_def", SymbolBody::DefinedRegular { section: None, value: 4, size: 0 });
        assert_eq!(can_be_preempted(&config, &tab, Some(def)), false);
        config.shared = true;
        assert_eq!(can_be_preempted(&config, &tab, Some(def)), true);

        /* hidden visibility pins it even in a DSO */
        tab.get_mut(def).visibility = STV_HIDDEN;
        assert_eq!(can_be_preempted(&config, &tab, Some(def)), false);
    }

    #[test]
    fn copy_semantics_are_data_only()
    {
        let mut tab = SymbolTable::new();
        let id = tab.define("environ", SymbolBody::Shared { file: 0, value: 0, size: 8, sec_align: 8, offset_in_bss: 0 });
        tab.get_mut(id).needs_copy_or_plt_addr = true;
        assert_eq!(tab.get(id).needs_copy(), true);

        tab.get_mut(id).st_type = STT_FUNC;
        assert_eq!(tab.get(id).needs_copy(), false);
    }
}
