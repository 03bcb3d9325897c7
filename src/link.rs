/* Drive the link from resolved symbols to a finished ELF file
 *
 * the pipeline is fixed: local symbols, reserved symbols, section
 * creation (factory, relocation scan, symbol membership, .bss packing,
 * section sort, finalize), then program headers and addresses, reserved
 * symbol fixes, and the write. Out owns every output section; everything
 * else refers to them by index
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::section_header::{ SHF_ALLOC, SHF_EXECINSTR, SHF_MERGE, SHF_WRITE,
                                   SHT_DYNAMIC, SHT_DYNSYM, SHT_FINI_ARRAY, SHT_HASH,
                                   SHT_INIT_ARRAY, SHT_NOBITS, SHT_PREINIT_ARRAY,
                                   SHT_PROGBITS, SHT_REL, SHT_RELA, SHT_STRTAB, SHT_SYMTAB };
use goblin::elf::sym::{ STT_FILE, STT_SECTION };
use goblin::elf::dynamic::{ DT_DEBUG, DT_FINI, DT_FINI_ARRAY, DT_FINI_ARRAYSZ, DT_FLAGS,
                            DT_HASH, DT_INIT, DT_INIT_ARRAY, DT_INIT_ARRAYSZ, DT_JMPREL,
                            DT_NEEDED, DT_NULL, DT_PLTGOT, DT_PLTREL, DT_PLTRELSZ,
                            DT_PREINIT_ARRAY, DT_PREINIT_ARRAYSZ, DT_REL, DT_RELA,
                            DT_RELAENT, DT_RELASZ, DT_RELENT, DT_RELSZ, DT_RPATH,
                            DT_SONAME, DT_STRSZ, DT_STRTAB, DT_SYMENT, DT_SYMTAB };

use super::bss;
use super::config::{ Config, Entry, Machine };
use super::enc::ElfClass;
use super::factory::{ output_section_name, OutputSectionFactory };
use super::layout;
use super::outsec::{ finalize_ehframe, finalize_merge, finalize_regular, finalize_reginfo,
                     OutSecId, OutSection, SecBody };
use super::phdrs;
use super::report::{ LinkError, Reporter };
use super::reserved;
use super::scan::scan_relocations;
use super::script::Script;
use super::symbol::{ SymbolBody, SymbolTable, SymId, STV_DEFAULT, STV_PROTECTED };
use super::synth::{ DynEntry, DynamicReloc, DynamicSection, GnuHashData, GotPltSection,
                    GotSection, PltSection, RelocSection, StringTable, SymTabSection,
                    SymtabEntry, SysvHashData, gnu_hash };
use super::target::Target;
use super::write;

/* dynamic-table constants goblin doesn't export */
pub const DT_GNU_HASH: u64 = 0x6fff_fef5;
pub const DT_FLAGS_1: u64 = 0x6fff_fffb;
pub const DF_BIND_NOW: u64 = 8;
pub const DF_1_NOW: u64 = 1;
pub const DT_MIPS_RLD_MAP: u64 = 0x7000_0016;
pub const SHT_GNU_HASH: u32 = 0x6fff_fff6;

/* every output section the writer owns or discovered, addressed by index */
pub struct Out
{
    pub class: ElfClass,
    pub sections: Vec<OutSection>,
    pub order: Vec<OutSecId>,

    /* the space reserved at the front of the file */
    pub elf_header: OutSecId,
    pub program_headers: Option<OutSecId>,

    /* writer-owned singletons. always constructed, added to the output
       order only when the link turns out to need them */
    pub interp: Option<OutSecId>,
    pub got: Option<OutSecId>,
    pub gotplt: Option<OutSecId>,
    pub plt: Option<OutSecId>,
    pub rela_dyn: Option<OutSecId>,
    pub rela_plt: Option<OutSecId>,
    pub dynamic: Option<OutSecId>,
    pub dynsym: Option<OutSecId>,
    pub dynstr: Option<OutSecId>,
    pub symtab: Option<OutSecId>,
    pub strtab: Option<OutSecId>,
    pub shstrtab: Option<OutSecId>,
    pub hash: Option<OutSecId>,
    pub gnu_hash: Option<OutSecId>,
    pub eh_frame_hdr: Option<OutSecId>,
    pub mips_rld_map: Option<OutSecId>,

    /* sections discovered among the inputs */
    pub bss: Option<OutSecId>,
    pub opd: Option<OutSecId>,
    pub ehframe: Option<OutSecId>,
    pub preinit_array: Option<OutSecId>,
    pub init_array: Option<OutSecId>,
    pub fini_array: Option<OutSecId>,

    /* a GOT-relative relocation was seen: emit the GOT even when empty */
    pub has_got_off_rel: bool,

    /* layout results */
    pub va_end: u64,
    pub file_size: u64,
    pub section_header_off: u64
}

impl Out
{
    /* a bare pool with just the ELF-header dummy, enough for unit tests
       and the factory */
    pub fn new() -> Out
    {
        let mut out = Out
        {
            class: ElfClass::new(true, false),
            sections: Vec::new(),
            order: Vec::new(),
            elf_header: OutSecId(0),
            program_headers: None,
            interp: None,
            got: None,
            gotplt: None,
            plt: None,
            rela_dyn: None,
            rela_plt: None,
            dynamic: None,
            dynsym: None,
            dynstr: None,
            symtab: None,
            strtab: None,
            shstrtab: None,
            hash: None,
            gnu_hash: None,
            eh_frame_hdr: None,
            mips_rld_map: None,
            bss: None,
            opd: None,
            ehframe: None,
            preinit_array: None,
            init_array: None,
            fini_array: None,
            has_got_off_rel: false,
            va_end: 0,
            file_size: 0,
            section_header_off: 0
        };
        out.elf_header = out.push_section(
            OutSection::new("", 0, SHF_ALLOC as u64, SecBody::Dummy));
        out
    }

    /* construct the dummies and singleton sections a real link uses */
    pub fn for_link(config: &Config, target: &dyn Target) -> Out
    {
        let mut out = Out::new();
        let class = ElfClass::new(config.is64, config.big_endian);
        out.class = class;
        let word = class.word_size();

        if config.relocatable == false
        {
            let mut ph = OutSection::new("", 0, SHF_ALLOC as u64, SecBody::Dummy);
            ph.align = word;
            out.program_headers = Some(out.push_section(ph));
        }

        let alloc = SHF_ALLOC as u64;
        let write_flag = SHF_WRITE as u64;

        let mut interp = OutSection::new(".interp", SHT_PROGBITS, alloc, SecBody::Interp);
        if let Some(path) = &config.dynamic_linker
        {
            interp.size = path.len() as u64 + 1;
        }
        out.interp = Some(out.push_section(interp));

        let mut dynstr = OutSection::new(".dynstr", SHT_STRTAB, alloc,
                                         SecBody::StrTab(StringTable::new()));
        dynstr.align = 1;
        let dynstr_id = out.push_section(dynstr);
        out.dynstr = Some(dynstr_id);

        let mut dynsym = OutSection::new(".dynsym", SHT_DYNSYM, alloc,
                                         SecBody::DynSym(SymTabSection::new(dynstr_id)));
        dynsym.align = word;
        dynsym.entsize = class.sym_size();
        out.dynsym = Some(out.push_section(dynsym));

        let mut got = OutSection::new(".got", SHT_PROGBITS, alloc | write_flag,
                                      SecBody::Got(GotSection::new()));
        got.align = word;
        out.got = Some(out.push_section(got));

        let mut plt = OutSection::new(".plt", SHT_PROGBITS, alloc | (SHF_EXECINSTR as u64),
                                      SecBody::Plt(PltSection::new()));
        plt.align = 16;
        out.plt = Some(out.push_section(plt));

        let (rela_name, rela_type) = if class.is_rela() { (".rela.dyn", SHT_RELA) } else { (".rel.dyn", SHT_REL) };
        let mut rela_dyn = OutSection::new(rela_name, rela_type, alloc,
                                           SecBody::RelaDyn(RelocSection::new()));
        rela_dyn.align = word;
        rela_dyn.entsize = if class.is_rela() { class.rela_size() } else { class.rel_size() };
        out.rela_dyn = Some(out.push_section(rela_dyn));

        if target.use_lazy_binding()
        {
            let mut gotplt = OutSection::new(".got.plt", SHT_PROGBITS, alloc | write_flag,
                                             SecBody::GotPlt(GotPltSection::new()));
            gotplt.align = word;
            out.gotplt = Some(out.push_section(gotplt));

            let (name, sh_type) = if class.is_rela() { (".rela.plt", SHT_RELA) } else { (".rel.plt", SHT_REL) };
            let mut rela_plt = OutSection::new(name, sh_type, alloc,
                                               SecBody::RelaPlt(RelocSection::new()));
            rela_plt.align = word;
            rela_plt.entsize = if class.is_rela() { class.rela_size() } else { class.rel_size() };
            out.rela_plt = Some(out.push_section(rela_plt));
        }

        let mut dynamic = OutSection::new(".dynamic", SHT_DYNAMIC, alloc | write_flag,
                                          SecBody::Dynamic(DynamicSection::new()));
        dynamic.align = word;
        dynamic.entsize = class.dyn_size();
        out.dynamic = Some(out.push_section(dynamic));

        let mut shstrtab = OutSection::new(".shstrtab", SHT_STRTAB, 0,
                                           SecBody::StrTab(StringTable::new()));
        shstrtab.align = 1;
        out.shstrtab = Some(out.push_section(shstrtab));

        if config.strip_all == false
        {
            let mut strtab = OutSection::new(".strtab", SHT_STRTAB, 0,
                                             SecBody::StrTab(StringTable::new()));
            strtab.align = 1;
            let strtab_id = out.push_section(strtab);
            out.strtab = Some(strtab_id);

            let mut symtab = OutSection::new(".symtab", SHT_SYMTAB, 0,
                                             SecBody::SymTab(SymTabSection::new(strtab_id)));
            symtab.align = word;
            symtab.entsize = class.sym_size();
            out.symtab = Some(out.push_section(symtab));
        }

        if config.gnu_hash
        {
            let mut gh = OutSection::new(".gnu.hash", SHT_GNU_HASH, alloc,
                                         SecBody::GnuHash(GnuHashData::new()));
            gh.align = word;
            out.gnu_hash = Some(out.push_section(gh));
        }

        if config.sysv_hash
        {
            let mut hash = OutSection::new(".hash", SHT_HASH, alloc,
                                           SecBody::Hash(SysvHashData::new()));
            hash.align = 4;
            hash.entsize = 4;
            out.hash = Some(out.push_section(hash));
        }

        let mut eh = OutSection::new(".eh_frame_hdr", SHT_PROGBITS, alloc, SecBody::EhFrameHdr);
        eh.align = 4;
        out.eh_frame_hdr = Some(out.push_section(eh));

        if config.machine == Machine::Mips && config.shared == false
        {
            /* space in the data segment the MIPS loader publishes its
               debug map through, named by DT_MIPS_RLD_MAP */
            let mut rld = OutSection::new(".rld_map", SHT_PROGBITS, alloc | write_flag,
                                          SecBody::MipsRldMap);
            rld.size = word;
            rld.align = word;
            out.mips_rld_map = Some(out.push_section(rld));
        }

        out
    }

    pub fn push_section(&mut self, sec: OutSection) -> OutSecId
    {
        self.sections.push(sec);
        OutSecId(self.sections.len() - 1)
    }

    pub fn section(&self, id: OutSecId) -> &OutSection { &self.sections[id.0] }
    pub fn section_mut(&mut self, id: OutSecId) -> &mut OutSection { &mut self.sections[id.0] }

    pub fn in_order(&self, id: OutSecId) -> bool
    {
        self.order.iter().any(|entry| *entry == id)
    }

    /* sections the header advertises: everything in order minus the
       dummies, plus the leading null entry */
    pub fn num_sections(&self) -> u64
    {
        let dummies = if self.program_headers.is_some() { 2 } else { 1 };
        (self.order.len() + 1 - dummies) as u64
    }

    fn got_id(&self) -> OutSecId
    {
        match self.got
        {
            Some(id) => id,
            None => fatal_msg!("GOT section was never created")
        }
    }

    pub fn got_section(&self) -> &GotSection
    {
        match &self.section(self.got_id()).body
        {
            SecBody::Got(got) => got,
            _ => fatal_msg!("GOT section has the wrong body")
        }
    }

    fn got_section_mut(&mut self) -> &mut GotSection
    {
        let id = self.got_id();
        match &mut self.section_mut(id).body
        {
            SecBody::Got(got) => got,
            _ => fatal_msg!("GOT section has the wrong body")
        }
    }

    pub fn gotplt_section(&self) -> Option<&GotPltSection>
    {
        let id = self.gotplt?;
        match &self.section(id).body
        {
            SecBody::GotPlt(gp) => Some(gp),
            _ => None
        }
    }

    pub fn plt_section(&self) -> &PltSection
    {
        let id = match self.plt
        {
            Some(id) => id,
            None => fatal_msg!("PLT section was never created")
        };
        match &self.section(id).body
        {
            SecBody::Plt(plt) => plt,
            _ => fatal_msg!("PLT section has the wrong body")
        }
    }

    pub fn add_got_entry(&mut self, symtab: &mut SymbolTable, id: SymId)
    {
        self.got_section_mut().add_entry(symtab, id);
    }

    pub fn add_got_dyn_tls_entry(&mut self, symtab: &mut SymbolTable, id: SymId) -> bool
    {
        self.got_section_mut().add_dyn_tls_entry(symtab, id)
    }

    pub fn add_got_tls_index(&mut self) -> bool
    {
        self.got_section_mut().add_tls_index()
    }

    pub fn add_mips_local_got_entry(&mut self)
    {
        self.got_section_mut().add_mips_local_entry();
    }

    pub fn add_gotplt_entry(&mut self, symtab: &mut SymbolTable, id: SymId)
    {
        let gotplt = match self.gotplt
        {
            Some(id) => id,
            None => fatal_msg!(".got.plt requested without lazy binding")
        };
        match &mut self.section_mut(gotplt).body
        {
            SecBody::GotPlt(gp) => gp.add_entry(symtab, id),
            _ => fatal_msg!(".got.plt section has the wrong body")
        }
    }

    pub fn add_plt_entry(&mut self, symtab: &mut SymbolTable, id: SymId)
    {
        let plt = match self.plt
        {
            Some(id) => id,
            None => fatal_msg!("PLT section was never created")
        };
        match &mut self.section_mut(plt).body
        {
            SecBody::Plt(p) => p.add_entry(symtab, id),
            _ => fatal_msg!("PLT section has the wrong body")
        }
    }

    /* a symbol named by a dynamic relocation must appear in .dynsym */
    fn mark_dynsym_needed(symtab: &mut SymbolTable, reloc: &DynamicReloc)
    {
        if let Some(sym) = reloc.sym
        {
            if reloc.use_sym_va == false
            {
                symtab.get_mut(sym).must_be_in_dynsym = true;
            }
        }
    }

    pub fn add_dyn_reloc(&mut self, symtab: &mut SymbolTable, reloc: DynamicReloc)
    {
        Out::mark_dynsym_needed(symtab, &reloc);
        let id = match self.rela_dyn
        {
            Some(id) => id,
            None => fatal_msg!(".rela.dyn section was never created")
        };
        match &mut self.section_mut(id).body
        {
            SecBody::RelaDyn(rs) => rs.add_reloc(reloc),
            _ => fatal_msg!(".rela.dyn section has the wrong body")
        }
    }

    pub fn add_plt_reloc(&mut self, symtab: &mut SymbolTable, reloc: DynamicReloc)
    {
        Out::mark_dynsym_needed(symtab, &reloc);
        let id = match self.rela_plt
        {
            Some(id) => id,
            None => fatal_msg!(".rela.plt requested without lazy binding")
        };
        match &mut self.section_mut(id).body
        {
            SecBody::RelaPlt(rs) => rs.add_reloc(reloc),
            _ => fatal_msg!(".rela.plt section has the wrong body")
        }
    }

    pub fn rela_dyn_relocs(&self) -> &[DynamicReloc]
    {
        match self.rela_dyn.map(|id| &self.section(id).body)
        {
            Some(SecBody::RelaDyn(rs)) => &rs.relocs,
            _ => &[]
        }
    }

    pub fn rela_plt_relocs(&self) -> &[DynamicReloc]
    {
        match self.rela_plt.map(|id| &self.section(id).body)
        {
            Some(SecBody::RelaPlt(rs)) => &rs.relocs,
            _ => &[]
        }
    }

    /* .bss comes into being the moment the first common symbol or copy
       relocation needs a home */
    pub fn ensure_bss(&mut self) -> OutSecId
    {
        if let Some(id) = self.bss
        {
            return id;
        }
        let sec = OutSection::new(".bss", SHT_NOBITS, (SHF_ALLOC | SHF_WRITE) as u64,
                                  SecBody::Regular { members: Vec::new() });
        let id = self.push_section(sec);
        self.order.push(id);
        self.bss = Some(id);
        id
    }

    /* the GOT is emitted when it has entries, when GOT-relative
       addressing was seen, or on dynamic MIPS where .dynamic names it */
    pub fn needs_got(&self, config: &Config, output_is_dynamic: bool) -> bool
    {
        if self.got_section().is_empty() == false
        {
            return true;
        }
        if config.machine == Machine::Mips && output_is_dynamic
        {
            return true;
        }
        self.has_got_off_rel
    }
}

pub fn is_output_dynamic(config: &Config, symtab: &SymbolTable) -> bool
{
    symtab.shared.is_empty() == false || config.shared
}

fn needs_interp_section(config: &Config, symtab: &SymbolTable) -> bool
{
    symtab.shared.is_empty() == false && config.dynamic_linker.is_some()
}

/* the whole link. returns the accumulated diagnostics on failure */
pub fn write_result(config: &Config, target: &dyn Target, script: &Script,
                    symtab: &mut SymbolTable) -> Result<(), Reporter>
{
    let mut reporter = Reporter::new();
    let mut out = Out::for_link(config, target);
    let output_is_dynamic = is_output_dynamic(config, symtab);

    if config.discard_all() == false
    {
        copy_local_symbols(config, symtab, &mut out);
    }
    reserved::add_reserved_symbols(symtab, output_is_dynamic);

    if create_sections(config, target, script, symtab, &mut out, &mut reporter,
                       output_is_dynamic) == false
    {
        return Err(reporter);
    }

    let mut phdr_table = if config.relocatable == false
    {
        let mut phdr_table = phdrs::create_phdrs(config, script, &out, output_is_dynamic);
        layout::assign_addresses(config, target, &mut out, &mut phdr_table);
        phdr_table
    }
    else
    {
        layout::assign_addresses_relocatable(&mut out);
        Vec::new()
    };

    layout::fix_absolute_symbols(config, symtab, &out);

    progress_msg!(config, "es: writing {} ({} bytes)", config.output_file, out.file_size);
    write::write_output(config, target, symtab, &out, &phdr_table, &mut reporter);

    if reporter.has_error()
    {
        return Err(reporter);
    }
    Ok(())
}

/* does this local belong in .symtab? assembler temporaries and section
   markers don't, and --discard-locals widens the cut */
fn should_keep_in_symtab(config: &Config, symtab: &SymbolTable, file: usize, local: usize) -> bool
{
    let entry = &symtab.objects[file].locals[local];
    let st_type = entry.sym.st_info & 0xf;
    if st_type == STT_SECTION || st_type == STT_FILE
    {
        return false;
    }

    if let Some(sec) = entry.section
    {
        if symtab.objects[file].sections[sec as usize].live == false
        {
            return false;
        }
    }

    if config.discard_none()
    {
        return true;
    }

    if entry.name.starts_with(".L") == false && entry.name.is_empty() == false
    {
        return true;
    }

    if config.discard_locals()
    {
        return false;
    }

    /* a .L symbol the assembler kept usually pins a merge section entry;
       keeping it after deduplication would mislead more than help */
    match entry.section
    {
        Some(sec) => symtab.objects[file].sections[sec as usize].header.sh_flags
                     & (SHF_MERGE as u64) == 0,
        None => true
    }
}

/* local symbols never enter the global table, so each object file's list
   is walked directly and survivors are queued for .symtab */
fn copy_local_symbols(config: &Config, symtab: &mut SymbolTable, out: &mut Out)
{
    let (symtab_id, strtab_id) = match (out.symtab, out.strtab)
    {
        (Some(s), Some(t)) => (s, t),
        _ => return
    };

    for file in 0..symtab.objects.len()
    {
        for local in 0..symtab.objects[file].locals.len()
        {
            if should_keep_in_symtab(config, symtab, file, local) == false
            {
                continue;
            }

            let name = symtab.objects[file].locals[local].name.clone();
            let name_off = match &mut out.section_mut(strtab_id).body
            {
                SecBody::StrTab(tab) => tab.add_string(&name),
                _ => fatal_msg!(".strtab section has the wrong body")
            };

            match &mut out.section_mut(symtab_id).body
            {
                SecBody::SymTab(tab) =>
                {
                    tab.entries.push(SymtabEntry::Local { file: file as u32, index: local, name_off });
                    tab.num_locals = tab.num_locals + 1;
                },
                _ => fatal_msg!(".symtab section has the wrong body")
            }
            symtab.objects[file].kept_locals.push((local, name_off));
        }
    }
}

/* numeric suffix ordering for __attribute__((init_priority(N))) */
fn init_fini_priority(name: &str) -> u32
{
    match name.rsplit('.').next().and_then(|suffix| suffix.parse::<u32>().ok())
    {
        Some(n) => n,
        None => 65536
    }
}

/* the GNU crtbegin convention: bare .ctors/.dtors lead, numbered
   sections follow in ascending order */
fn ctors_dtors_priority(name: &str) -> u32
{
    if name == ".ctors" || name == ".dtors"
    {
        return 0;
    }
    match name.rsplit('.').next().and_then(|suffix| suffix.parse::<u32>().ok())
    {
        Some(n) => 1 + n,
        None => u32::MAX
    }
}

fn sort_member_sections(symtab: &SymbolTable, out: &mut Out, sec: Option<OutSecId>,
                        priority: fn(&str) -> u32)
{
    if let Some(id) = sec
    {
        if let SecBody::Regular { members } = &mut out.section_mut(id).body
        {
            members.sort_by_key(|m|
                priority(&symtab.objects[m.file as usize].sections[m.sec as usize].name));
        }
    }
}

fn report_undefined(config: &Config, reporter: &mut Reporter, symtab: &SymbolTable, id: SymId)
{
    if (config.relocatable || config.shared) && config.no_undefined == false
    {
        return;
    }

    let sym = symtab.get(id);
    let msg = match sym.file
    {
        Some(file) => format!("{} in {}", sym.name, symtab.objects[file as usize].name),
        None => sym.name.clone()
    };
    if config.no_inhibit_exec
    {
        reporter.warning(format!("undefined symbol: {}", msg));
    }
    else
    {
        reporter.error(LinkError::UndefinedSymbol(msg));
    }
}

fn include_in_symtab(symtab: &SymbolTable, id: SymId) -> bool
{
    let sym = symtab.get(id);
    if sym.used_in_regular_obj == false
    {
        return false;
    }
    match &sym.body
    {
        SymbolBody::Ignored => false,
        SymbolBody::DefinedRegular { section: Some(sec), .. } =>
        {
            /* symbols whose section was garbage-collected go with it */
            symtab.objects[sec.file as usize].sections[sec.sec as usize].live
        },
        _ => true
    }
}

fn include_in_dynsym(config: &Config, symtab: &SymbolTable, id: SymId) -> bool
{
    let sym = symtab.get(id);
    if sym.visibility != STV_DEFAULT && sym.visibility != STV_PROTECTED
    {
        return false;
    }
    if matches!(sym.body, SymbolBody::Ignored)
    {
        return false;
    }
    if config.export_dynamic || config.shared
    {
        return true;
    }
    sym.must_be_in_dynsym || sym.is_shared()
}

/* create every output section, run the scanner and the symbol passes,
   and leave the section list sorted and sized. false means the link is
   already known to have failed */
fn create_sections(config: &Config, target: &dyn Target, script: &Script,
                   symtab: &mut SymbolTable, out: &mut Out, reporter: &mut Reporter,
                   output_is_dynamic: bool) -> bool
{
    out.order.push(out.elf_header);
    if let Some(ph) = out.program_headers
    {
        out.order.push(ph);
    }

    /* .interp goes in early: loaders like finding it on the first page */
    if needs_interp_section(config, symtab)
    {
        if let Some(interp) = out.interp
        {
            out.order.push(interp);
        }
    }

    /* map every live input section to an output section */
    let mut factory = OutputSectionFactory::new();
    let mut regular_sections: Vec<OutSecId> = Vec::new();

    for file in 0..symtab.objects.len()
    {
        for sec in 0..symtab.objects[file].sections.len()
        {
            let (discarded, name, align, is_ehframe) =
            {
                let insec = &symtab.objects[file].sections[sec];
                let discarded = insec.live == false || script.is_discarded(&insec.name);
                (discarded,
                 output_section_name(script, &insec.name),
                 insec.header.sh_addralign.max(1),
                 insec.kind == super::input::SectionKind::EhFrame)
            };

            if discarded
            {
                if config.print_gc_sections && symtab.objects[file].sections[sec].live == false
                {
                    eprintln!("removing unused section from '{}' in file '{}'",
                              symtab.objects[file].sections[sec].name,
                              symtab.objects[file].name);
                }
                continue;
            }

            let (id, is_new) =
            {
                let insec = &symtab.objects[file].sections[sec];
                factory.create(out, config, insec, &name)
            };
            if is_new
            {
                out.order.push(id);
                regular_sections.push(id);
                if is_ehframe
                {
                    out.ehframe = Some(id);
                }
            }

            let secref = super::input::SecRef { file: file as u32, sec: sec as u32 };
            out.section_mut(id).add_section(secref, align);
            symtab.objects[file].sections[sec].out_sec = Some(id);
        }
    }

    /* discover the optional sections other passes care about */
    let alloc_write = (SHF_ALLOC | SHF_WRITE) as u64;
    out.bss = factory.lookup(".bss", SHT_NOBITS, alloc_write);
    out.opd = factory.lookup(".opd", SHT_PROGBITS, alloc_write);
    out.preinit_array = factory.lookup(".preinit_array", SHT_PREINIT_ARRAY, alloc_write);
    out.init_array = factory.lookup(".init_array", SHT_INIT_ARRAY, alloc_write);
    out.fini_array = factory.lookup(".fini_array", SHT_FINI_ARRAY, alloc_write);

    /* order initializers before member offsets freeze */
    sort_member_sections(symtab, out, out.init_array, init_fini_priority);
    sort_member_sections(symtab, out, out.fini_array, init_fini_priority);
    sort_member_sections(symtab, out, factory.lookup(".ctors", SHT_PROGBITS, alloc_write),
                         ctors_dtors_priority);
    sort_member_sections(symtab, out, factory.lookup(".dtors", SHT_PROGBITS, alloc_write),
                         ctors_dtors_priority);

    /* lay out member contents now so section sizes exist for the
       start/stop symbols and the scanner's addend bookkeeping */
    for idx in 0..out.order.len()
    {
        let id = out.order[idx];
        if matches!(out.sections[id.0].body, SecBody::Regular { .. })
        {
            finalize_regular(&mut out.sections[id.0], &mut symtab.objects);
        }
        else if matches!(out.sections[id.0].body, SecBody::Merge(_))
        {
            finalize_merge(&mut out.sections[id.0], &symtab.objects);
        }
        else if matches!(out.sections[id.0].body, SecBody::EhFrame(_))
        {
            finalize_ehframe(&mut out.sections[id.0], &symtab.objects, config.big_endian);
        }
        else if matches!(out.sections[id.0].body, SecBody::MipsReginfo { .. })
        {
            finalize_reginfo(&mut out.sections[id.0], &symtab.objects, config.big_endian);
        }
    }

    /* the reserved-symbol passes that need sections to exist */
    reserved::add_start_end_symbols(symtab, out);
    for id in regular_sections
    {
        reserved::add_start_stop_symbols(symtab, out, id);
    }
    reserved::ignore_unmatched_start_stop(symtab);
    reserved::add_rel_iplt_symbols(config, symtab, output_is_dynamic, out);

    /* scan relocations now that every symbol is declared */
    scan_relocations(config, target, script, symtab, out);

    /* visit the globals: report danglers, gather the .bss dwellers, and
       pick the output symbol tables' members */
    let ids: Vec<SymId> = symtab.globals().collect();
    let mut commons: Vec<SymId> = Vec::new();
    let mut copy_rels: Vec<SymId> = Vec::new();

    for id in ids
    {
        let (undefined, can_keep, weak) = match &symtab.get(id).body
        {
            SymbolBody::Undefined { can_keep } => (true, *can_keep, symtab.get(id).is_weak),
            _ => (false, false, false)
        };
        if undefined && weak == false && can_keep == false
        {
            report_undefined(config, reporter, symtab, id);
        }

        if symtab.get(id).is_common()
        {
            commons.push(id);
        }
        if symtab.get(id).needs_copy()
        {
            copy_rels.push(id);
        }

        if include_in_symtab(symtab, id)
        {
            if let Some(symtab_id) = out.symtab
            {
                match &mut out.section_mut(symtab_id).body
                {
                    SecBody::SymTab(tab) => tab.add_symbol(id),
                    _ => fatal_msg!(".symtab section has the wrong body")
                }
            }
        }

        if output_is_dynamic && include_in_dynsym(config, symtab, id)
        {
            if let Some(dynsym_id) = out.dynsym
            {
                match &mut out.section_mut(dynsym_id).body
                {
                    SecBody::DynSym(tab) => tab.add_symbol(id),
                    _ => fatal_msg!(".dynsym section has the wrong body")
                }
            }
        }
    }

    /* do not lay out a broken link */
    if reporter.has_error()
    {
        return false;
    }

    bss::add_common_symbols(symtab, out, commons);
    bss::add_copy_rel_symbols(symtab, out, copy_rels);

    add_predefined_sections(config, out, output_is_dynamic);

    /* the stable sort that fixes the final section order */
    let dummies = if out.program_headers.is_some() { 2 } else { 1 };
    {
        let got = out.got.filter(|id| out.in_order(*id));
        let gotplt = out.gotplt.filter(|id| out.in_order(*id));
        let dynamic = out.dynamic.filter(|id| out.in_order(*id));
        let Out { ref sections, ref mut order, .. } = *out;
        let ctx = super::order::OrderContext
        {
            config,
            script,
            sections,
            got,
            gotplt,
            dynamic
        };
        order[dummies..].sort_by(|a, b| super::order::compare_sections(&ctx, *a, *b));
    }

    /* hand out header-table indices, dummies excluded */
    for idx in dummies..out.order.len()
    {
        let id = out.order[idx];
        out.section_mut(id).section_index = (idx + 1 - dummies) as u32;
    }

    /* every section name lands in .shstrtab */
    let shstrtab_id = match out.shstrtab
    {
        Some(id) => id,
        None => fatal_msg!(".shstrtab section was never created")
    };
    for idx in dummies..out.order.len()
    {
        let id = out.order[idx];
        let name = out.section(id).name.clone();
        let off = match &mut out.section_mut(shstrtab_id).body
        {
            SecBody::StrTab(tab) => tab.add_string(&name),
            _ => fatal_msg!(".shstrtab section has the wrong body")
        };
        out.section_mut(id).sh_name = off;
    }

    /* finalize sizes: .dynsym first since it feeds the hash tables, then
       everything else, then .dynamic, whose tags quote sibling sizes and
       which appends the last strings to .dynstr */
    if output_is_dynamic
    {
        finalize_dynsym(config, symtab, out);
    }
    finalize_symtab(symtab, out);
    finalize_synthetic_sizes(target, out);
    if output_is_dynamic
    {
        finalize_dynamic(config, symtab, out);
    }
    if let Some(dynstr_id) = out.dynstr
    {
        let len = match &out.section(dynstr_id).body
        {
            SecBody::StrTab(tab) => tab.len(),
            _ => 0
        };
        out.section_mut(dynstr_id).size = len;
    }

    set_section_links(out);
    true
}

/* push the writer-owned sections that earned a place in the output */
fn add_predefined_sections(config: &Config, out: &mut Out, output_is_dynamic: bool)
{
    /* decide the whole list first, then push: this keeps the decisions,
       which read the section pool, apart from the mutation */
    let mut picks: Vec<Option<OutSecId>> = Vec::new();

    picks.push(out.symtab);
    picks.push(out.shstrtab);
    picks.push(out.strtab);

    if output_is_dynamic
    {
        picks.push(out.dynsym);
        picks.push(out.gnu_hash);
        picks.push(out.hash);
        picks.push(out.dynamic);
        picks.push(out.dynstr);
        if out.rela_dyn_relocs().is_empty() == false
        {
            picks.push(out.rela_dyn);
        }
        picks.push(out.mips_rld_map);
    }

    /* .rela.plt appears even in static links: IRELATIVE lives there */
    if out.rela_plt_relocs().is_empty() == false
    {
        picks.push(out.rela_plt);
        let is_static = output_is_dynamic == false;
        if let Some(id) = out.rela_plt
        {
            if let SecBody::RelaPlt(rs) = &mut out.section_mut(id).body
            {
                rs.is_static = is_static;
            }
        }
    }

    if out.needs_got(config, output_is_dynamic)
    {
        picks.push(out.got);
    }
    if out.gotplt_section().map(|gp| gp.is_empty() == false).unwrap_or(false)
    {
        picks.push(out.gotplt);
    }
    if out.plt_section().is_empty() == false
    {
        picks.push(out.plt);
    }
    if out.ehframe.is_some()
    {
        picks.push(out.eh_frame_hdr);
    }

    for id in picks.into_iter().flatten()
    {
        out.order.push(id);
    }
}

/* assign .dynsym order and indices, then derive both hash tables.
   gnu-hashed symbols must sit at the table's tail sorted by bucket */
fn finalize_dynsym(config: &Config, symtab: &mut SymbolTable, out: &mut Out)
{
    let dynsym_id = match out.dynsym
    {
        Some(id) => id,
        None => return
    };
    let dynstr_id = match out.dynstr
    {
        Some(id) => id,
        None => fatal_msg!(".dynstr section was never created")
    };

    let rows: Vec<SymId> = match &out.section(dynsym_id).body
    {
        SecBody::DynSym(tab) => tab.entries.iter().filter_map(|entry| match entry
        {
            SymtabEntry::Global { sym, .. } => Some(*sym),
            _ => None
        }).collect(),
        _ => fatal_msg!(".dynsym section has the wrong body")
    };

    let mut unhashed: Vec<SymId> = Vec::new();
    let mut hashed: Vec<SymId> = Vec::new();
    for id in rows
    {
        if symtab.get(id).is_undefined()
        {
            unhashed.push(id);
        }
        else
        {
            hashed.push(id);
        }
    }

    let mut hashes: Vec<u32> = Vec::new();
    if config.gnu_hash
    {
        let nbuckets = if hashed.is_empty() { 1 } else { (hashed.len() as u32).next_power_of_two() };
        hashed.sort_by_key(|id| gnu_hash(&symtab.get(*id).name) % nbuckets);
        hashes = hashed.iter().map(|id| gnu_hash(&symtab.get(*id).name)).collect();
    }

    let final_rows: Vec<SymId> = unhashed.iter().chain(hashed.iter()).copied().collect();
    let symoffset = 1 + unhashed.len() as u32;

    /* names first, then indices, then the rebuilt entry list */
    let mut entries: Vec<SymtabEntry> = Vec::new();
    for (position, id) in final_rows.iter().enumerate()
    {
        let name = symtab.get(*id).name.clone();
        let name_off = match &mut out.section_mut(dynstr_id).body
        {
            SecBody::StrTab(tab) => tab.add_string(&name),
            _ => fatal_msg!(".dynstr section has the wrong body")
        };
        symtab.get_mut(*id).dynsym_index = Some(position as u32 + 1);
        entries.push(SymtabEntry::Global { sym: *id, name_off });
    }

    let count = 1 + entries.len() as u64;
    let sym_size = out.class.sym_size();
    match &mut out.section_mut(dynsym_id).body
    {
        SecBody::DynSym(tab) => tab.entries = entries,
        _ => ()
    }
    out.section_mut(dynsym_id).size = count * sym_size;

    if config.gnu_hash
    {
        if let Some(gh_id) = out.gnu_hash
        {
            let word = out.class.word_size();
            let word_bits = (word * 8) as u32;
            let mut size = 0;
            if let SecBody::GnuHash(data) = &mut out.section_mut(gh_id).body
            {
                data.build(&hashes, symoffset, word_bits);
                size = data.table_size(word);
            }
            out.section_mut(gh_id).size = size;
        }
    }

    if let Some(hash_id) = out.hash
    {
        let names: Vec<String> = final_rows.iter()
            .map(|id| symtab.get(*id).name.clone()).collect();
        let mut size = 0;
        if let SecBody::Hash(data) = &mut out.section_mut(hash_id).body
        {
            data.build(&names);
            size = data.table_size();
        }
        out.section_mut(hash_id).size = size;
    }
}

/* fill .symtab's global names and freeze its size */
fn finalize_symtab(symtab: &SymbolTable, out: &mut Out)
{
    let (symtab_id, strtab_id) = match (out.symtab, out.strtab)
    {
        (Some(s), Some(t)) => (s, t),
        _ => return
    };

    let globals: Vec<(usize, SymId)> = match &out.section(symtab_id).body
    {
        SecBody::SymTab(tab) => tab.entries.iter().enumerate().filter_map(|(i, e)| match e
        {
            SymtabEntry::Global { sym, .. } => Some((i, *sym)),
            _ => None
        }).collect(),
        _ => return
    };

    for (index, sym) in globals
    {
        let name = symtab.get(sym).name.clone();
        let name_off = match &mut out.section_mut(strtab_id).body
        {
            SecBody::StrTab(tab) => tab.add_string(&name),
            _ => fatal_msg!(".strtab section has the wrong body")
        };
        if let SecBody::SymTab(tab) = &mut out.section_mut(symtab_id).body
        {
            tab.entries[index] = SymtabEntry::Global { sym, name_off };
        }
    }

    let (count, strtab_len) =
    {
        let count = match &out.section(symtab_id).body
        {
            SecBody::SymTab(tab) => tab.count(),
            _ => 0
        };
        let len = match &out.section(strtab_id).body
        {
            SecBody::StrTab(tab) => tab.len(),
            _ => 0
        };
        (count, len)
    };
    let sym_size = out.class.sym_size();
    out.section_mut(symtab_id).size = count * sym_size;
    out.section_mut(strtab_id).size = strtab_len;
}

/* sizes for the singleton sections whose contents are already decided */
fn finalize_synthetic_sizes(target: &dyn Target, out: &mut Out)
{
    let class = out.class;
    let word = class.word_size();
    let rel_size = if class.is_rela() { class.rela_size() } else { class.rel_size() };

    if let Some(id) = out.got
    {
        let size = out.got_section().entry_count() * word;
        out.section_mut(id).size = size;
    }
    if let Some(id) = out.gotplt
    {
        let count = out.gotplt_section().map(|gp| gp.entries.len() as u64).unwrap_or(0);
        let size = (super::synth::GOTPLT_HEADER_ENTRIES as u64 + count) * word;
        out.section_mut(id).size = size;
    }
    if let Some(id) = out.plt
    {
        let count = out.plt_section().entries.len() as u64;
        let size = target.plt_header_size() + count * target.plt_entry_size();
        out.section_mut(id).size = size;
    }
    if let Some(id) = out.rela_dyn
    {
        let size = out.rela_dyn_relocs().len() as u64 * rel_size;
        out.section_mut(id).size = size;
    }
    if let Some(id) = out.rela_plt
    {
        let size = out.rela_plt_relocs().len() as u64 * rel_size;
        out.section_mut(id).size = size;
    }
    if let Some(id) = out.eh_frame_hdr
    {
        let fde_count = match out.ehframe.map(|eh| &out.section(eh).body)
        {
            Some(SecBody::EhFrame(body)) => body.fdes.len() as u64,
            _ => 0
        };
        out.section_mut(id).size = 12 + 8 * fde_count;
    }
    if let Some(id) = out.shstrtab
    {
        let len = match &out.section(id).body
        {
            SecBody::StrTab(tab) => tab.len(),
            _ => 0
        };
        out.section_mut(id).size = len;
    }
}

/* build the .dynamic entry list. tags that quote addresses or sizes are
   deferred to write time, when layout has happened */
fn finalize_dynamic(config: &Config, symtab: &SymbolTable, out: &mut Out)
{
    let dynamic_id = match out.dynamic
    {
        Some(id) => id,
        None => return
    };
    let dynstr_id = match out.dynstr
    {
        Some(id) => id,
        None => fatal_msg!(".dynstr section was never created")
    };

    let add_string = |out: &mut Out, s: &str| -> u64
    {
        match &mut out.section_mut(dynstr_id).body
        {
            SecBody::StrTab(tab) => tab.add_string(s) as u64,
            _ => fatal_msg!(".dynstr section has the wrong body")
        }
    };

    let mut entries: Vec<DynEntry> = Vec::new();

    for shared in &symtab.shared
    {
        if shared.is_used
        {
            let off = add_string(out, &shared.soname);
            entries.push(DynEntry::Val { tag: DT_NEEDED, val: off });
        }
    }
    if let Some(rpath) = &config.rpath
    {
        let off = add_string(out, rpath);
        entries.push(DynEntry::Val { tag: DT_RPATH, val: off });
    }
    if config.shared
    {
        if let Some(soname) = &config.soname
        {
            let off = add_string(out, soname);
            entries.push(DynEntry::Val { tag: DT_SONAME, val: off });
        }
    }

    let class = out.class;
    let rel_size = if class.is_rela() { class.rela_size() } else { class.rel_size() };
    if out.rela_dyn_relocs().is_empty() == false
    {
        let id = out.rela_dyn.unwrap_or(dynamic_id);
        let (tag_tab, tag_sz, tag_ent) = if class.is_rela()
        {
            (DT_RELA, DT_RELASZ, DT_RELAENT)
        }
        else
        {
            (DT_REL, DT_RELSZ, DT_RELENT)
        };
        entries.push(DynEntry::SecAddr { tag: tag_tab, sec: id });
        entries.push(DynEntry::SecSize { tag: tag_sz, sec: id });
        entries.push(DynEntry::Val { tag: tag_ent, val: rel_size });
    }

    let plt_static = match out.rela_plt.map(|id| &out.section(id).body)
    {
        Some(SecBody::RelaPlt(rs)) => rs.is_static,
        _ => false
    };
    if out.rela_plt_relocs().is_empty() == false && plt_static == false
    {
        let id = out.rela_plt.unwrap_or(dynamic_id);
        entries.push(DynEntry::SecAddr { tag: DT_JMPREL, sec: id });
        entries.push(DynEntry::SecSize { tag: DT_PLTRELSZ, sec: id });
        if let Some(gotplt) = out.gotplt
        {
            entries.push(DynEntry::SecAddr { tag: DT_PLTGOT, sec: gotplt });
        }
        entries.push(DynEntry::Val { tag: DT_PLTREL,
                                     val: if class.is_rela() { DT_RELA } else { DT_REL } });
    }

    if let Some(dynsym) = out.dynsym
    {
        entries.push(DynEntry::SecAddr { tag: DT_SYMTAB, sec: dynsym });
        entries.push(DynEntry::Val { tag: DT_SYMENT, val: class.sym_size() });
    }
    entries.push(DynEntry::SecAddr { tag: DT_STRTAB, sec: dynstr_id });
    entries.push(DynEntry::SecSize { tag: DT_STRSZ, sec: dynstr_id });
    if let Some(gh) = out.gnu_hash
    {
        entries.push(DynEntry::SecAddr { tag: DT_GNU_HASH, sec: gh });
    }
    if let Some(hash) = out.hash
    {
        entries.push(DynEntry::SecAddr { tag: DT_HASH, sec: hash });
    }

    if let Some(sec) = out.preinit_array
    {
        entries.push(DynEntry::SecAddr { tag: DT_PREINIT_ARRAY, sec });
        entries.push(DynEntry::SecSize { tag: DT_PREINIT_ARRAYSZ, sec });
    }
    if let Some(sec) = out.init_array
    {
        entries.push(DynEntry::SecAddr { tag: DT_INIT_ARRAY, sec });
        entries.push(DynEntry::SecSize { tag: DT_INIT_ARRAYSZ, sec });
    }
    if let Some(sec) = out.fini_array
    {
        entries.push(DynEntry::SecAddr { tag: DT_FINI_ARRAY, sec });
        entries.push(DynEntry::SecSize { tag: DT_FINI_ARRAYSZ, sec });
    }

    for (tag, name) in [(DT_INIT, "_init"), (DT_FINI, "_fini")]
    {
        if let Some(id) = symtab.find(name)
        {
            let id = symtab.repl(id);
            if symtab.get(id).is_undefined() == false
            {
                entries.push(DynEntry::SymAddr { tag, sym: id });
            }
        }
    }

    if let Some(rld) = out.mips_rld_map
    {
        entries.push(DynEntry::SecAddr { tag: DT_MIPS_RLD_MAP, sec: rld });
    }
    if config.z_now
    {
        entries.push(DynEntry::Val { tag: DT_FLAGS, val: DF_BIND_NOW });
        entries.push(DynEntry::Val { tag: DT_FLAGS_1, val: DF_1_NOW });
    }
    if config.shared == false
    {
        entries.push(DynEntry::Val { tag: DT_DEBUG, val: 0 });
    }
    entries.push(DynEntry::Val { tag: DT_NULL, val: 0 });

    let size = entries.len() as u64 * class.dyn_size();
    if let SecBody::Dynamic(dynamic) = &mut out.section_mut(dynamic_id).body
    {
        dynamic.entries = entries;
    }
    out.section_mut(dynamic_id).size = size;
}

/* sh_link/sh_info wiring between the table sections, done once indices
   are final */
fn set_section_links(out: &mut Out)
{
    let index_of = |out: &Out, id: Option<OutSecId>| -> u32
    {
        match id
        {
            Some(id) if out.in_order(id) => out.section(id).section_index,
            _ => 0
        }
    };

    let dynsym_index = index_of(out, out.dynsym);
    let dynstr_index = index_of(out, out.dynstr);
    let strtab_index = index_of(out, out.strtab);
    let gotplt_index = index_of(out, out.gotplt);

    if let Some(id) = out.dynsym
    {
        out.section_mut(id).link = dynstr_index;
        out.section_mut(id).info = 1;
    }
    if let Some(id) = out.symtab
    {
        let num_locals = match &out.section(id).body
        {
            SecBody::SymTab(tab) => tab.num_locals,
            _ => 0
        };
        out.section_mut(id).link = strtab_index;
        out.section_mut(id).info = num_locals + 1;
    }
    if let Some(id) = out.gnu_hash
    {
        out.section_mut(id).link = dynsym_index;
    }
    if let Some(id) = out.hash
    {
        out.section_mut(id).link = dynsym_index;
    }
    if let Some(id) = out.rela_dyn
    {
        out.section_mut(id).link = dynsym_index;
    }
    if let Some(id) = out.rela_plt
    {
        out.section_mut(id).link = dynsym_index;
        out.section_mut(id).info = gotplt_index;
    }
    if let Some(id) = out.dynamic
    {
        out.section_mut(id).link = dynstr_index;
    }
}

/* where execution starts: the -e symbol through its replacement, a raw
   address, or zero */
pub fn entry_address(config: &Config, symtab: &SymbolTable, out: &Out) -> u64
{
    match &config.entry
    {
        Entry::Symbol(name) => match symtab.find(name)
        {
            Some(id) => symtab.symbol_va(out, id),
            None => 0
        },
        Entry::Address(addr) => *addr,
        Entry::Default => 0
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::convert::TryInto;
    use goblin::elf::section_header::SectionHeader;
    use crate::config::default_config;
    use crate::input::{ InputSection, ObjectFile, SectionKind };
    use crate::target::X86_64Target;

    fn object_with_text() -> ObjectFile
    {
        let mut file = ObjectFile::new("main.o");
        let mut header = SectionHeader::default();
        header.sh_type = SHT_PROGBITS;
        header.sh_flags = (SHF_ALLOC | SHF_EXECINSTR) as u64;
        header.sh_size = 32;
        header.sh_addralign = 16;
        file.sections.push(InputSection::new(".text", header, vec![0x90; 32], SectionKind::Regular));
        file
    }

    #[test]
    fn static_executable_has_no_dynamic_parts()
    {
        let config = default_config();
        let target = X86_64Target;
        let script = Script::new();
        let mut symtab = SymbolTable::new();
        symtab.add_object(object_with_text());

        let mut out = Out::for_link(&config, &target);
        let mut reporter = Reporter::new();
        assert!(create_sections(&config, &target, &script, &mut symtab, &mut out,
                                &mut reporter, false));

        assert!(out.in_order(out.dynsym.unwrap()) == false);
        assert!(out.in_order(out.dynamic.unwrap()) == false);
        assert!(out.in_order(out.got.unwrap()) == false);
        assert!(out.in_order(out.symtab.unwrap()));
    }

    #[test]
    fn undefined_symbols_fail_the_link()
    {
        let config = default_config();
        let target = X86_64Target;
        let script = Script::new();
        let mut symtab = SymbolTable::new();
        symtab.add_object(object_with_text());
        let missing = symtab.insert("missing_function");
        symtab.get_mut(missing).used_in_regular_obj = true;

        let mut out = Out::for_link(&config, &target);
        let mut reporter = Reporter::new();
        assert_eq!(create_sections(&config, &target, &script, &mut symtab, &mut out,
                                   &mut reporter, false), false);
        assert!(reporter.has_error());
    }

    #[test]
    fn shared_output_tolerates_undefined()
    {
        let mut config = default_config();
        config.shared = true;
        let target = X86_64Target;
        let script = Script::new();
        let mut symtab = SymbolTable::new();
        symtab.add_object(object_with_text());
        symtab.insert("resolved_at_load_time");

        let mut out = Out::for_link(&config, &target);
        let mut reporter = Reporter::new();
        assert!(create_sections(&config, &target, &script, &mut symtab, &mut out,
                                &mut reporter, true));
        assert_eq!(reporter.has_error(), false);
    }

    #[test]
    fn init_array_members_sort_by_priority()
    {
        assert!(init_fini_priority(".init_array.00010") < init_fini_priority(".init_array.00020"));
        assert!(init_fini_priority(".init_array.5") < init_fini_priority(".init_array"));
        assert_eq!(ctors_dtors_priority(".ctors"), 0);
        assert!(ctors_dtors_priority(".ctors.100") > ctors_dtors_priority(".ctors.50"));
    }

    #[test]
    fn relocatable_output_keeps_one_dummy()
    {
        let mut config = default_config();
        config.relocatable = true;
        let target = X86_64Target;
        let out = Out::for_link(&config, &target);
        assert!(out.program_headers.is_none());
    }

    #[test]
    fn whole_static_link_produces_a_valid_header()
    {
        let mut config = default_config();
        config.output_file = std::env::temp_dir().join("elfsmith_test_static")
                             .to_str().unwrap().to_string();
        config.entry = Entry::Symbol(String::from("_start"));

        let target = X86_64Target;
        let script = Script::new();
        let mut symtab = SymbolTable::new();
        symtab.add_object(object_with_text());

        let start = symtab.define("_start", SymbolBody::DefinedRegular
        {
            section: Some(crate::input::SecRef { file: 0, sec: 0 }),
            value: 0,
            size: 0
        });
        symtab.get_mut(start).used_in_regular_obj = true;

        assert!(write_result(&config, &target, &script, &mut symtab).is_ok());

        let bytes = std::fs::read(&config.output_file).unwrap();
        assert_eq!(&bytes[..4], b"\x7fELF");
        assert_eq!(bytes[4], 2);    /* 64-bit */
        assert_eq!(bytes[5], 1);    /* little-endian */
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 2);  /* ET_EXEC */

        /* the entry point resolved to _start inside the image */
        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert!(entry >= 0x400000);

        std::fs::remove_file(&config.output_file).ok();
    }

    #[test]
    fn whole_shared_link_emits_a_relative_relocation()
    {
        use goblin::elf::reloc::R_X86_64_64;
        use crate::input::{ Reloc, RelSym };

        let mut config = default_config();
        config.shared = true;
        config.output_file = std::env::temp_dir().join("elfsmith_test_shared")
                             .to_str().unwrap().to_string();

        let target = X86_64Target;
        let script = Script::new();
        let mut symtab = SymbolTable::new();
        symtab.add_object(object_with_text());
        symtab.objects[0].sections[0].relocs = vec!
        [
            Reloc
            {
                r_type: R_X86_64_64,
                offset: 16,
                addend: 0,
                sym: RelSym::Local { section: 0, value: 8, is_section: false }
            }
        ];

        let exported = symtab.define("visible_thing", SymbolBody::DefinedRegular
        {
            section: Some(crate::input::SecRef { file: 0, sec: 0 }),
            value: 4,
            size: 4
        });
        symtab.get_mut(exported).used_in_regular_obj = true;

        assert!(write_result(&config, &target, &script, &mut symtab).is_ok());

        let bytes = std::fs::read(&config.output_file).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 3);  /* ET_DYN */

        std::fs::remove_file(&config.output_file).ok();
    }
}
