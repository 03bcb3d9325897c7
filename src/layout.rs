/* Place sections in the file and in memory
 *
 * one pass over the sorted section list assigns every file offset and
 * virtual address. segment starts land on page boundaries so the loader
 * can mmap them with the right permissions; everything else packs as
 * tightly as alignment allows. NOBITS sections take addresses but no file
 * space, and TLS NOBITS takes thread-local space instead of address space
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashSet;

use goblin::elf::program_header::{ PT_GNU_RELRO, PT_LOAD, PT_TLS };
use goblin::elf::section_header::SHF_WRITE;

use super::config::{ Config, Machine };
use super::link::Out;
use super::phdrs::{ needs_pt_load, Phdr };
use super::symbol::{ SymbolBody, SymbolTable };
use super::target::Target;

/* the MIPS gp register points 0x7ff0 past the GOT so signed 16-bit
   offsets reach both directions */
const MIPS_GP_OFFSET: u64 = 0x7ff0;

/* align value up to nearest alignment-number of bytes.
   note: alignment must be a non-zero power-of-2. ie, 1, 2, 4, 8, 16... */
pub fn align_up_to(value: u64, alignment: u64) -> u64
{
    let align_down = value & !(alignment - 1);

    if align_down == value
    {
        value
    }
    else
    {
        align_down + alignment
    }
}

/* assign file offsets and virtual addresses to every output section,
   then derive each program header's placement from the sections it spans */
pub fn assign_addresses(config: &Config, target: &dyn Target, out: &mut Out,
                        phdrs: &mut Vec<Phdr>)
{
    let class = out.class;
    out.section_mut(out.elf_header).size = class.ehdr_size();
    if let Some(ph) = out.program_headers
    {
        out.section_mut(ph).size = class.phdr_size() * phdrs.len() as u64;
    }

    /* the first section of each PT_LOAD, and the first section after
       PT_GNU_RELRO when it sits in a load, start on a page boundary */
    let mut page_align: HashSet<crate::outsec::OutSecId> = HashSet::new();
    for phdr in phdrs.iter()
    {
        if phdr.p_type == PT_GNU_RELRO
        {
            if let Some(last) = phdr.last
            {
                if let Some(pos) = out.order.iter().position(|id| *id == last)
                {
                    if let Some(next) = out.order.get(pos + 1)
                    {
                        if needs_pt_load(out.section(*next))
                        {
                            page_align.insert(*next);
                        }
                    }
                }
            }
        }
        if phdr.p_type == PT_LOAD
        {
            if let Some(first) = phdr.first
            {
                page_align.insert(first);
            }
        }
    }

    let mut thread_bss_offset = 0u64;
    let mut va = target.va_start(config.shared);
    let mut file_off = 0u64;

    for idx in 0..out.order.len()
    {
        let id = out.order[idx];
        let mut align = out.section(id).align;
        if page_align.contains(&id)
        {
            align = align.max(target.page_size());
        }

        let nobits = out.section(id).is_nobits();
        if nobits == false
        {
            file_off = align_up_to(file_off, align);
        }
        out.section_mut(id).file_off = file_off;
        if nobits == false
        {
            file_off = file_off + out.section(id).size;
        }

        if needs_pt_load(out.section(id))
        {
            va = align_up_to(va, align);
            out.section_mut(id).va = va;
            va = va + out.section(id).size;
        }
        else if out.section(id).is_tls() && nobits
        {
            /* thread-relative: each thread's allocator places this after
               the initialization image, so it never consumes process VA */
            let tva = align_up_to(va + thread_bss_offset, align);
            out.section_mut(id).va = tva;
            thread_bss_offset = tva - va + out.section(id).size;
        }
    }

    out.va_end = va;
    out.section_header_off = align_up_to(file_off, class.word_size());
    out.file_size = out.section_header_off + out.num_sections() * class.shdr_size();

    /* now the sections know where they are, each header's span follows */
    for phdr in phdrs.iter_mut()
    {
        if let (Some(first), Some(last)) = (phdr.first, phdr.last)
        {
            let first_sec = out.section(first);
            let last_sec = out.section(last);
            phdr.offset = first_sec.file_off;
            phdr.vaddr = first_sec.va;
            phdr.filesz = last_sec.file_off + last_sec.size_on_disk() - first_sec.file_off;
            phdr.memsz = last_sec.va + last_sec.size - first_sec.va;
        }

        if phdr.p_type == PT_LOAD
        {
            phdr.align = target.page_size();
        }
        else if phdr.p_type == PT_GNU_RELRO
        {
            phdr.align = 1;
        }

        /* the thread pointer lands right after the TLS image and the
           runtime aligns it, so the size must already be rounded */
        if phdr.p_type == PT_TLS && phdr.align > 0
        {
            phdr.memsz = align_up_to(phdr.memsz, phdr.align);
        }
    }
}

/* relocatable output packs sections with nothing but their alignment:
   no page boundaries, no virtual addresses, no segments */
pub fn assign_addresses_relocatable(out: &mut Out)
{
    let class = out.class;
    out.section_mut(out.elf_header).size = class.ehdr_size();

    let mut file_off = 0u64;
    for idx in 0..out.order.len()
    {
        let id = out.order[idx];
        let align = out.section(id).align.max(1);
        file_off = align_up_to(file_off, align);
        out.section_mut(id).file_off = file_off;
        file_off = file_off + out.section(id).size;
    }

    out.section_header_off = align_up_to(file_off, class.word_size());
    out.file_size = out.section_header_off + out.num_sections() * class.shdr_size();
}

/* write a new value into a reserved absolute symbol, if it was installed */
fn set_absolute(symtab: &mut SymbolTable, name: &str, value: u64)
{
    if let Some(id) = symtab.find(name)
    {
        let id = symtab.repl(id);
        if let SymbolBody::Absolute { value: ref mut v } = symtab.get_mut(id).body
        {
            *v = value;
        }
    }
}

/* after layout, the reserved symbols get their real values */
pub fn fix_absolute_symbols(config: &Config, symtab: &mut SymbolTable, out: &Out)
{
    /* __rel[a]_iplt_{start,end} bracket the static ifunc relocations */
    if let Some(rela_plt) = out.rela_plt
    {
        let sec = out.section(rela_plt);
        let (start_name, end_name) = if config.is64
        {
            ("__rela_iplt_start", "__rela_iplt_end")
        }
        else
        {
            ("__rel_iplt_start", "__rel_iplt_end")
        };
        set_absolute(symtab, start_name, sec.va);
        set_absolute(symtab, end_name, sec.va + sec.size);
    }

    /* MIPS gp points into the GOT at a fixed bias */
    if config.machine == Machine::Mips
    {
        if let Some(got) = out.got
        {
            set_absolute(symtab, "_gp", out.section(got).va + MIPS_GP_OFFSET);
        }
    }

    /* _end: one past the data segment. _etext: after the last read-only
       loadable section. _edata: after the last section with file bytes */
    set_absolute(symtab, "_end", out.va_end);
    set_absolute(symtab, "end", out.va_end);

    let mut etext = 0u64;
    let mut edata = 0u64;
    for id in &out.order
    {
        let sec = out.section(*id);
        if sec.is_alloc() == false
        {
            continue;
        }
        if sec.flags & (SHF_WRITE as u64) == 0
        {
            etext = sec.va + sec.size;
        }
        if sec.is_nobits() == false
        {
            edata = sec.va + sec.size;
        }
    }
    set_absolute(symtab, "_etext", etext);
    set_absolute(symtab, "etext", etext);
    set_absolute(symtab, "_edata", edata);
    set_absolute(symtab, "edata", edata);
}

#[cfg(test)]
mod tests
{
    use super::*;
    use goblin::elf::section_header::{ SHF_ALLOC, SHF_EXECINSTR, SHF_TLS, SHT_NOBITS, SHT_PROGBITS };
    use crate::config::default_config;
    use crate::outsec::{ OutSecId, OutSection, SecBody };
    use crate::phdrs::create_phdrs;
    use crate::script::Script;
    use crate::target::X86_64Target;

    fn add_sized(out: &mut Out, name: &str, sh_type: u32, flags: u64, size: u64, align: u64) -> OutSecId
    {
        let mut sec = OutSection::new(name, sh_type, flags, SecBody::Regular { members: Vec::new() });
        sec.size = size;
        sec.align = align;
        let id = out.push_section(sec);
        out.order.push(id);
        id
    }

    fn harness() -> Out
    {
        let config = default_config();
        let target = X86_64Target;
        let mut out = Out::for_link(&config, &target);
        out.order.push(out.elf_header);
        out.order.push(out.program_headers.unwrap());
        out
    }

    #[test]
    fn align_up_to_behaves()
    {
        assert_eq!(align_up_to(0, 8), 0);
        assert_eq!(align_up_to(1, 8), 8);
        assert_eq!(align_up_to(8, 8), 8);
        assert_eq!(align_up_to(9, 4096), 4096);
    }

    #[test]
    fn loads_are_mmap_compatible_and_offsets_monotonic()
    {
        let config = default_config();
        let target = X86_64Target;
        let script = Script::new();
        let mut out = harness();

        let alloc = SHF_ALLOC as u64;
        add_sized(&mut out, ".text", SHT_PROGBITS, alloc | (SHF_EXECINSTR as u64), 0x123, 16);
        add_sized(&mut out, ".data", SHT_PROGBITS, alloc | (SHF_WRITE as u64), 0x40, 8);
        let bss = add_sized(&mut out, ".bss", SHT_NOBITS, alloc | (SHF_WRITE as u64), 0x1000, 16);

        let mut phdrs = create_phdrs(&config, &script, &out, false);
        assign_addresses(&config, &target, &mut out, &mut phdrs);

        /* every PT_LOAD must satisfy vaddr ≡ offset (mod pagesize) */
        for phdr in phdrs.iter().filter(|p| p.p_type == PT_LOAD)
        {
            assert_eq!(phdr.vaddr % 4096, phdr.offset % 4096);
            assert_eq!(phdr.align, 4096);
        }

        /* file offsets never go backwards, and NOBITS takes no file space */
        let mut prev = 0;
        for id in &out.order
        {
            let sec = out.section(*id);
            assert!(sec.file_off >= prev);
            prev = sec.file_off;
            assert!(sec.file_off + sec.size_on_disk() <= out.file_size);
        }
        let data_end = out.section(out.order[out.order.len() - 2]).file_off
                     + out.section(out.order[out.order.len() - 2]).size;
        assert!(out.section(bss).file_off <= data_end);

        /* sections stay inside the segment that claims them */
        for phdr in phdrs.iter().filter(|p| p.p_type == PT_LOAD)
        {
            for id in &out.order
            {
                let sec = out.section(*id);
                if Some(*id) == phdr.first || Some(*id) == phdr.last
                {
                    assert!(phdr.vaddr <= sec.va);
                    assert!(sec.va + sec.size <= phdr.vaddr + phdr.memsz);
                }
            }
        }
    }

    #[test]
    fn tls_nobits_gets_thread_relative_addresses()
    {
        let config = default_config();
        let target = X86_64Target;
        let script = Script::new();
        let mut out = harness();

        let alloc = SHF_ALLOC as u64;
        let write = SHF_WRITE as u64;
        let tls = SHF_TLS as u64;
        let tdata = add_sized(&mut out, ".tdata", SHT_PROGBITS, alloc | write | tls, 0x10, 8);
        let tbss = add_sized(&mut out, ".tbss", SHT_NOBITS, alloc | write | tls, 0x20, 8);
        let data = add_sized(&mut out, ".data", SHT_PROGBITS, alloc | write, 0x8, 8);

        let mut phdrs = create_phdrs(&config, &script, &out, false);
        assign_addresses(&config, &target, &mut out, &mut phdrs);

        /* .tbss overlaps the address range that .data occupies: it lives
           in thread-local space, not the process image */
        assert!(out.section(tbss).va >= out.section(tdata).va);
        assert_eq!(out.section(data).va, align_up_to(out.section(tdata).va + 0x10, 8));

        /* PT_TLS memsz is rounded to its alignment */
        let tls_hdr = phdrs.iter().find(|p| p.p_type == PT_TLS).unwrap();
        assert_eq!(tls_hdr.memsz % tls_hdr.align, 0);
    }

    #[test]
    fn relocatable_output_packs_without_addresses()
    {
        let config = default_config();
        let target = X86_64Target;
        let mut out = Out::for_link(&config, &target);
        out.order.push(out.elf_header);

        let text = add_sized(&mut out, ".text", SHT_PROGBITS, SHF_ALLOC as u64, 0x11, 16);
        let data = add_sized(&mut out, ".data", SHT_PROGBITS, SHF_ALLOC as u64, 0x8, 8);

        assign_addresses_relocatable(&mut out);

        assert_eq!(out.section(text).va, 0);
        assert_eq!(out.section(data).va, 0);
        assert_eq!(out.section(text).file_off, 64);
        assert_eq!(out.section(data).file_off, align_up_to(64 + 0x11, 8));
        assert!(out.file_size > 0);
    }

    #[test]
    fn reserved_symbols_get_layout_values()
    {
        let config = default_config();
        let target = X86_64Target;
        let script = Script::new();
        let mut out = harness();
        let mut symtab = SymbolTable::new();

        symtab.insert("_end");
        symtab.insert("_etext");
        symtab.insert("_edata");
        crate::reserved::add_reserved_symbols(&mut symtab, false);

        let alloc = SHF_ALLOC as u64;
        add_sized(&mut out, ".text", SHT_PROGBITS, alloc | (SHF_EXECINSTR as u64), 0x100, 16);
        add_sized(&mut out, ".data", SHT_PROGBITS, alloc | (SHF_WRITE as u64), 0x40, 8);
        add_sized(&mut out, ".bss", SHT_NOBITS, alloc | (SHF_WRITE as u64), 0x80, 8);

        let mut phdrs = create_phdrs(&config, &script, &out, false);
        assign_addresses(&config, &target, &mut out, &mut phdrs);
        fix_absolute_symbols(&config, &mut symtab, &out);

        let lookup = |name: &str| match symtab.get(symtab.find(name).unwrap()).body
        {
            SymbolBody::Absolute { value } => value,
            _ => panic!("{} is not absolute", name)
        };

        /* _end covers .bss, _edata stops at .data, _etext at .text */
        assert_eq!(lookup("_end"), out.va_end);
        let data_id = out.order[out.order.len() - 2];
        assert_eq!(lookup("_edata"), out.section(data_id).va + 0x40);
        let text_id = out.order[out.order.len() - 3];
        assert_eq!(lookup("_etext"), out.section(text_id).va + 0x100);
        assert!(lookup("_end") >= lookup("_edata"));
    }
}
