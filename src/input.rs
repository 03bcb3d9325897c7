/* Input files as the output core receives them
 *
 * parsing happened upstream: object files arrive with their sections,
 * local symbols and relocation records already decoded. the structures
 * here just hold that material and remember where each piece ends up in
 * the output
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::section_header::SectionHeader;
use goblin::elf::sym::Sym;

use super::symbol::SymId;
use super::outsec::OutSecId;

/* identify an input section: which object file, which section within it */
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SecRef
{
    pub file: u32,
    pub sec: u32
}

/* how the output core treats a section's contents */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SectionKind
{
    Regular,        /* concatenated byte-for-byte */
    EhFrame,        /* CIE/FDE records, deduplicated */
    Merge,          /* constant/string entries, deduplicated */
    MipsReginfo     /* register-usage summaries, folded together */
}

/* who a relocation is against. locals never enter the global symbol
   table, so their section and value ride along with the record */
#[derive(Clone, Copy, Debug)]
pub enum RelSym
{
    Global(SymId),
    Local { section: u32, value: u64, is_section: bool },
    None
}

/* one pre-parsed relocation record */
#[derive(Clone, Copy, Debug)]
pub struct Reloc
{
    pub r_type: u32,
    pub offset: u64,
    pub addend: i64,
    pub sym: RelSym
}

/* a section carried in from an object file. identity is stable for the
   whole link: the writer refers back to these by SecRef until commit */
pub struct InputSection
{
    pub name: String,
    pub header: SectionHeader,
    pub data: Vec<u8>,
    pub kind: SectionKind,

    /* cleared by the external garbage-collection pass */
    pub live: bool,

    /* records from this section's associated .rela.* sections, in the
       order those relocation sections listed them */
    pub relocs: Vec<Reloc>,

    /* where the section landed in the output, set during layout */
    pub out_sec: Option<OutSecId>,
    pub out_off: u64
}

impl InputSection
{
    pub fn new(name: &str, header: SectionHeader, data: Vec<u8>, kind: SectionKind) -> InputSection
    {
        InputSection
        {
            name: String::from(name),
            header,
            data,
            kind,
            live: true,
            relocs: Vec::new(),
            out_sec: None,
            out_off: 0
        }
    }
}

/* a local symbol kept inside its object file */
pub struct LocalSymbol
{
    pub name: String,
    pub sym: Sym,
    pub section: Option<u32>    /* None for SHN_ABS locals */
}

/* a relocatable object file presented to the link */
pub struct ObjectFile
{
    pub name: String,
    pub sections: Vec<InputSection>,
    pub locals: Vec<LocalSymbol>,

    /* identity bytes the output header inherits from the first input */
    pub os_abi: u8,
    pub e_machine: u16,

    /* local symbols that made it into .symtab: (index into locals,
       name offset in .strtab), filled by the local-symbol pass */
    pub kept_locals: Vec<(usize, u32)>
}

impl ObjectFile
{
    pub fn new(name: &str) -> ObjectFile
    {
        ObjectFile
        {
            name: String::from(name),
            sections: Vec::new(),
            locals: Vec::new(),
            os_abi: 0,
            e_machine: 0,
            kept_locals: Vec::new()
        }
    }

    /* resolve a relocation's symbol reference to a global body, or None
       for locals and symbol-less records */
    pub fn get_symbol_body(&self, rel: &Reloc) -> Option<SymId>
    {
        match rel.sym
        {
            RelSym::Global(id) => Some(id),
            _ => None
        }
    }
}

/* a shared library the link may take definitions from */
pub struct SharedFile
{
    pub name: String,
    pub soname: String,

    /* false until a relocation actually needs the library (--as-needed) */
    pub is_used: bool
}

impl SharedFile
{
    pub fn new(name: &str, soname: &str, as_needed: bool) -> SharedFile
    {
        SharedFile
        {
            name: String::from(name),
            soname: String::from(soname),
            is_used: as_needed == false
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn as_needed_libraries_start_unused()
    {
        let eager = SharedFile::new("libc.so.6", "libc.so.6", false);
        let lazy = SharedFile::new("libm.so.6", "libm.so.6", true);
        assert_eq!(eager.is_used, true);
        assert_eq!(lazy.is_used, false);
    }

    #[test]
    fn local_relocations_resolve_to_no_body()
    {
        let file = ObjectFile::new("demo.o");
        let rel = Reloc
        {
            r_type: 0,
            offset: 0,
            addend: 0,
            sym: RelSym::Local { section: 0, value: 0, is_section: true }
        };
        assert!(file.get_symbol_body(&rel).is_none());
    }
}
