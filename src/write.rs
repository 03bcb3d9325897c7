/* Put the bytes of the output file in place
 *
 * the file is created at exactly the size layout computed and mapped
 * writable. the header, program headers and section headers are written
 * from the structures earlier phases built; each output section then
 * serializes its own body at its file offset. nothing is appended: every
 * write lands at a precomputed position
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::fs::OpenOptions;
use memmap2::{ MmapMut, MmapOptions };

use goblin::elf::header::{ ELFCLASS32, ELFCLASS64, ELFDATA2LSB, ELFDATA2MSB,
                           ELFMAG, ET_DYN, ET_EXEC, ET_REL, EV_CURRENT };
use goblin::elf::program_header::PT_TLS;

use super::config::Config;
use super::enc::Enc;
use super::input::SecRef;
use super::link::{ entry_address, Out };
use super::outsec::{ OutSection, SecBody };
use super::phdrs::Phdr;
use super::report::{ LinkError, Reporter };
use super::symbol::{ SymbolBody, SymbolTable };
use super::synth::{ DynEntry, DynamicReloc, RelocLoc, SymtabEntry, GOTPLT_HEADER_ENTRIES };
use super::target::Target;

const SHN_ABS: u16 = 0xfff1;

/* the PPC64 TOC base pointer sits a fixed bias into the TOC area, which
   starts at the GOT */
const PPC64_TOC_BIAS: u64 = 0x8000;

/* .eh_frame_hdr pointer encodings */
const DW_EH_PE_PCREL_SDATA4: u8 = 0x1b;
const DW_EH_PE_UDATA4: u8 = 0x03;
const DW_EH_PE_DATAREL_SDATA4: u8 = 0x3b;

/* map, fill and flush the output file. errors land in the reporter and
   leave no committed file behind */
pub fn write_output(config: &Config, target: &dyn Target, symtab: &SymbolTable,
                    out: &Out, phdrs: &[Phdr], reporter: &mut Reporter)
{
    let mut mapping = match open_output(config, out.file_size)
    {
        Ok(mapping) => mapping,
        Err(reason) =>
        {
            reporter.error(LinkError::IoOpen(format!("{}: {}", config.output_file, reason)));
            return;
        }
    };

    write_header(config, target, symtab, out, phdrs, &mut mapping);
    write_section_headers(out, &mut mapping);
    write_bodies(config, target, symtab, out, phdrs, &mut mapping);

    if let Err(reason) = mapping.flush()
    {
        reporter.error(LinkError::IoCommit(format!("{}: {}", config.output_file, reason)));
    }
}

fn open_output(config: &Config, size: u64) -> Result<MmapMut, String>
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&config.output_file)
        .map_err(|e| e.to_string())?;
    file.set_len(size).map_err(|e| e.to_string())?;

    /* the mapping is private to us until commit; nobody else should be
       touching the output file while we fill it */
    unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| e.to_string())
}

fn output_type(config: &Config) -> u16
{
    if config.shared
    {
        return ET_DYN;
    }
    if config.relocatable
    {
        return ET_REL;
    }
    ET_EXEC
}

fn write_header(config: &Config, target: &dyn Target, symtab: &SymbolTable,
                out: &Out, phdrs: &[Phdr], buf: &mut [u8])
{
    let class = out.class;

    /* identity bytes come from the first input object when there is one */
    let (os_abi, machine) = match symtab.objects.first()
    {
        Some(first) if first.e_machine != 0 => (first.os_abi, first.e_machine),
        Some(first) => (first.os_abi, config.e_machine()),
        None => (0, config.e_machine())
    };

    let mut enc = Enc::new(buf, class);
    enc.put_bytes(ELFMAG);
    enc.put_u8(if class.is64 { ELFCLASS64 } else { ELFCLASS32 });
    enc.put_u8(if class.big_endian { ELFDATA2MSB } else { ELFDATA2LSB });
    enc.put_u8(EV_CURRENT);
    enc.put_u8(os_abi);

    /* rest of e_ident stays zero */
    enc.seek(16);
    enc.put_half(output_type(config));
    enc.put_half(machine);
    enc.put_word(EV_CURRENT as u32);
    enc.put_xword(entry_address(config, symtab, out));
    enc.put_xword(if config.relocatable { 0 } else { class.ehdr_size() });
    enc.put_xword(out.section_header_off);
    enc.put_word(target.e_flags(config));
    enc.put_half(class.ehdr_size() as u16);
    if config.relocatable
    {
        enc.put_half(0);
        enc.put_half(0);
    }
    else
    {
        enc.put_half(class.phdr_size() as u16);
        enc.put_half(phdrs.len() as u16);
    }
    enc.put_half(class.shdr_size() as u16);
    enc.put_half(out.num_sections() as u16);
    enc.put_half(match out.shstrtab
    {
        Some(id) => out.section(id).section_index as u16,
        None => 0
    });

    /* the program-header table sits right after the ELF header */
    if config.relocatable == false
    {
        enc.seek(class.ehdr_size() as usize);
        for phdr in phdrs
        {
            enc.put_phdr(phdr.p_type, phdr.flags, phdr.offset, phdr.vaddr,
                         phdr.vaddr, phdr.filesz, phdr.memsz, phdr.align);
        }
    }
}

/* the section-header table, with its leading null entry */
fn write_section_headers(out: &Out, buf: &mut [u8])
{
    let class = out.class;
    let mut enc = Enc::new(buf, class);

    /* entry zero stays null: skip over it */
    enc.seek((out.section_header_off + class.shdr_size()) as usize);

    for id in &out.order
    {
        let sec = out.section(*id);
        if matches!(sec.body, SecBody::Dummy)
        {
            continue;
        }
        enc.put_shdr(sec.sh_name, sec.sh_type, sec.flags,
                     if sec.is_alloc() { sec.va } else { 0 },
                     sec.file_off, sec.size, sec.link, sec.info, sec.align, sec.entsize);
    }
}

fn write_bodies(config: &Config, target: &dyn Target, symtab: &SymbolTable,
                out: &Out, phdrs: &[Phdr], buf: &mut [u8])
{
    /* PPC64 function descriptors first: applying relocations in other
       sections depends on .opd's contents being in place */
    if let Some(opd) = out.opd
    {
        write_section(config, target, symtab, out, phdrs, out.section(opd), buf);
    }

    for id in &out.order
    {
        if Some(*id) == out.opd
        {
            continue;
        }
        write_section(config, target, symtab, out, phdrs, out.section(*id), buf);
    }
}

/* the final virtual address of an input-section offset, translating
   through merge deduplication when needed */
fn input_place_va(symtab: &SymbolTable, out: &Out, sec: SecRef, offset: u64) -> u64
{
    let insec = &symtab.objects[sec.file as usize].sections[sec.sec as usize];
    match insec.out_sec
    {
        Some(os) => out.section(os).va + insec.out_off + out.section(os).merge_offset(sec, offset),
        None => 0
    }
}

fn tls_segment_base(phdrs: &[Phdr]) -> u64
{
    phdrs.iter().find(|p| p.p_type == PT_TLS).map(|p| p.vaddr).unwrap_or(0)
}

fn write_section(config: &Config, target: &dyn Target, symtab: &SymbolTable,
                 out: &Out, phdrs: &[Phdr], sec: &OutSection, buf: &mut [u8])
{
    let class = out.class;
    let word = class.word_size();
    let base = sec.file_off as usize;

    match &sec.body
    {
        SecBody::Dummy => (),

        SecBody::Regular { members } =>
        {
            if sec.is_nobits()
            {
                return;
            }
            for m in members
            {
                let insec = &symtab.objects[m.file as usize].sections[m.sec as usize];
                if insec.live == false || insec.data.is_empty()
                {
                    continue;
                }
                let at = base + insec.out_off as usize;
                buf[at..at + insec.data.len()].copy_from_slice(&insec.data);
            }
        },

        SecBody::Merge(merge) =>
        {
            for (piece, off) in &merge.pieces
            {
                let at = base + *off as usize;
                buf[at..at + piece.len()].copy_from_slice(piece);
            }
        },

        SecBody::EhFrame(eh) =>
        {
            for (cie, off) in &eh.cies
            {
                let at = base + *off as usize;
                buf[at..at + cie.len()].copy_from_slice(cie);
            }
            for fde in &eh.fdes
            {
                let at = base + fde.out_off as usize;
                buf[at..at + fde.data.len()].copy_from_slice(&fde.data);

                /* re-point the CIE reference at the deduplicated copy */
                let delta = (fde.out_off + 4 - fde.cie_off) as u32;
                let bytes = if class.big_endian { delta.to_be_bytes() } else { delta.to_le_bytes() };
                buf[at + 4..at + 8].copy_from_slice(&bytes);
            }
        },

        SecBody::Interp =>
        {
            if let Some(path) = &config.dynamic_linker
            {
                buf[base..base + path.len()].copy_from_slice(path.as_bytes());
                /* trailing NUL is already there: the mapping starts zeroed */
            }
        },

        SecBody::Got(got) =>
        {
            let mut enc = Enc::new(buf, class);
            for (index, entry) in got.entries.iter().enumerate()
            {
                if let Some(sym) = entry
                {
                    let slot = (got.mips_local_entries as u64 + index as u64) * word;
                    enc.seek(base + slot as usize);
                    enc.put_xword(symtab.symbol_va(out, *sym));
                }
            }
        },

        SecBody::GotPlt(gotplt) =>
        {
            let mut enc = Enc::new(buf, class);
            enc.seek(base);

            /* slot 0 holds .dynamic's address; the loader fills 1 and 2 */
            match out.dynamic
            {
                Some(dynamic) if out.in_order(dynamic) => enc.put_xword(out.section(dynamic).va),
                _ => enc.put_xword(0)
            }
            enc.put_xword(0);
            enc.put_xword(0);

            let plt_va = out.plt.map(|id| out.section(id).va).unwrap_or(0);
            for (index, _) in gotplt.entries.iter().enumerate()
            {
                let entry_va = plt_va + target.plt_header_size()
                               + index as u64 * target.plt_entry_size();
                enc.put_xword(target.got_plt_entry_value(entry_va));
            }
        },

        SecBody::Plt(plt) =>
        {
            let header = target.plt_header_size() as usize;
            let entry_size = target.plt_entry_size() as usize;
            let gotplt_va = out.gotplt.map(|id| out.section(id).va).unwrap_or(0);
            let got_va = out.got.map(|id| out.section(id).va).unwrap_or(0);

            if header > 0
            {
                target.write_plt_header(&mut buf[base..base + header], gotplt_va, sec.va);
            }

            for (index, sym) in plt.entries.iter().enumerate()
            {
                let entry_va = sec.va + header as u64 + (index * entry_size) as u64;
                let slot_va = if target.use_lazy_binding()
                {
                    let slot = symtab.get(*sym).gotplt_index.unwrap_or(0);
                    gotplt_va + (GOTPLT_HEADER_ENTRIES as u64 + slot as u64) * word
                }
                else
                {
                    let slot = symtab.get(*sym).got_index.unwrap_or(0);
                    got_va + out.got_section().entry_offset(slot, word)
                };
                let at = base + header + index * entry_size;
                target.write_plt_entry(&mut buf[at..at + entry_size], slot_va, entry_va,
                                       sec.va, index as u32);
            }
        },

        SecBody::RelaDyn(rs) | SecBody::RelaPlt(rs) =>
        {
            let entry = if class.is_rela() { class.rela_size() } else { class.rel_size() };
            let mut enc = Enc::new(buf, class);
            for (index, reloc) in rs.relocs.iter().enumerate()
            {
                let (offset, symidx, addend) = resolve_dyn_reloc(symtab, out, reloc, word);
                enc.seek(base + (index as u64 * entry) as usize);
                enc.put_reloc(offset, reloc.r_type, symidx, addend);
            }
        },

        SecBody::Dynamic(dynamic) =>
        {
            let mut enc = Enc::new(buf, class);
            enc.seek(base);
            for entry in &dynamic.entries
            {
                match entry
                {
                    DynEntry::Val { tag, val } => enc.put_dyn(*tag, *val),
                    DynEntry::SecAddr { tag, sec } => enc.put_dyn(*tag, out.section(*sec).va),
                    DynEntry::SecSize { tag, sec } => enc.put_dyn(*tag, out.section(*sec).size),
                    DynEntry::SymAddr { tag, sym } => enc.put_dyn(*tag, symtab.symbol_va(out, *sym))
                }
            }
        },

        SecBody::DynSym(tab) | SecBody::SymTab(tab) =>
        {
            write_symbol_table(symtab, out, phdrs, tab.entries.as_slice(), base, buf);
        },

        SecBody::StrTab(tab) =>
        {
            buf[base..base + tab.data.len()].copy_from_slice(&tab.data);
        },

        SecBody::Hash(hash) =>
        {
            let mut enc = Enc::new(buf, class);
            enc.seek(base);
            enc.put_word(hash.buckets.len() as u32);
            enc.put_word(hash.chains.len() as u32);
            for bucket in &hash.buckets
            {
                enc.put_word(*bucket);
            }
            for chain in &hash.chains
            {
                enc.put_word(*chain);
            }
        },

        SecBody::GnuHash(gh) =>
        {
            let mut enc = Enc::new(buf, class);
            enc.seek(base);
            enc.put_word(gh.nbuckets);
            enc.put_word(gh.symoffset);
            enc.put_word(gh.bloom.len() as u32);
            enc.put_word(gh.bloom_shift);
            for bloom in &gh.bloom
            {
                enc.put_xword(*bloom);
            }
            for bucket in &gh.buckets
            {
                enc.put_word(*bucket);
            }
            for chain in &gh.chains
            {
                enc.put_word(*chain);
            }
        },

        SecBody::EhFrameHdr =>
        {
            write_eh_frame_hdr(out, sec, base, buf);
        },

        /* the loader writes its debug map pointer here at runtime */
        SecBody::MipsRldMap => (),

        SecBody::MipsReginfo { gprmask, gp_value, .. } =>
        {
            let mut enc = Enc::new(buf, class);
            enc.seek(base);
            enc.put_word(*gprmask);
            for _ in 0..4
            {
                enc.put_word(0);
            }
            enc.put_word(*gp_value as u32);
        }
    }
}

/* turn a recorded dynamic relocation into its on-disk fields */
fn resolve_dyn_reloc(symtab: &SymbolTable, out: &Out, reloc: &DynamicReloc,
                     word: u64) -> (u64, u32, i64)
{
    let got_va = out.got.map(|id| out.section(id).va).unwrap_or(0);
    let gotplt_va = out.gotplt.map(|id| out.section(id).va).unwrap_or(0);
    let bss_va = out.bss.map(|id| out.section(id).va).unwrap_or(0);

    let slot_of = |sym: &crate::symbol::SymId| -> u64
    {
        out.got_section().entry_offset(symtab.get(*sym).got_index.unwrap_or(0), word)
    };

    let offset = match &reloc.loc
    {
        RelocLoc::Got(sym) => got_va + slot_of(sym),
        RelocLoc::GotTlsIndex(sym) => got_va + slot_of(sym),
        RelocLoc::GotTlsOffset(sym) => got_va + slot_of(sym) + word,
        RelocLoc::LocalTlsIndex =>
        {
            let index = out.got_section().tls_index_off.unwrap_or(0);
            got_va + out.got_section().entry_offset(index, word)
        },
        RelocLoc::GotPlt(sym) =>
        {
            let index = symtab.get(*sym).gotplt_index.unwrap_or(0);
            gotplt_va + (GOTPLT_HEADER_ENTRIES as u64 + index as u64) * word
        },
        RelocLoc::Bss(sym) => match symtab.get(*sym).body
        {
            SymbolBody::Shared { offset_in_bss, .. } => bss_va + offset_in_bss,
            _ => bss_va
        },
        RelocLoc::InSection { sec, offset } => input_place_va(symtab, out, *sec, *offset)
    };

    let symidx = match (reloc.sym, reloc.use_sym_va)
    {
        (Some(sym), false) => symtab.get(symtab.repl(sym)).dynsym_index.unwrap_or(0),
        _ => 0
    };

    let mut addend = reloc.addend;
    if reloc.use_sym_va
    {
        if let Some(sym) = reloc.sym
        {
            addend = addend.wrapping_add(symtab.symbol_va(out, sym) as i64);
        }
    }
    if reloc.ppc64_toc
    {
        addend = addend.wrapping_add((got_va + PPC64_TOC_BIAS) as i64);
    }
    if let Some(target_sec) = reloc.target_sec
    {
        addend = addend.wrapping_add(
            input_place_va(symtab, out, target_sec, reloc.target_off) as i64);
    }

    (offset, symidx, addend)
}

/* which header-table entry a symbol's definition lives in */
fn symbol_shndx(symtab: &SymbolTable, out: &Out, sym: &crate::symbol::Symbol) -> u16
{
    match &sym.body
    {
        SymbolBody::DefinedRegular { section: Some(sec), .. } =>
        {
            let insec = &symtab.objects[sec.file as usize].sections[sec.sec as usize];
            match insec.out_sec
            {
                Some(os) => out.section(os).section_index as u16,
                None => 0
            }
        },
        SymbolBody::DefinedRegular { section: None, .. } => SHN_ABS,
        SymbolBody::DefinedSynthetic { section, .. } => out.section(*section).section_index as u16,
        SymbolBody::DefinedCommon { .. } | SymbolBody::Shared { .. } =>
        {
            match (sym.needs_copy() || sym.is_common(), out.bss)
            {
                (true, Some(bss)) => out.section(bss).section_index as u16,
                _ => 0
            }
        },
        SymbolBody::Absolute { .. } => SHN_ABS,
        SymbolBody::Undefined { .. } | SymbolBody::Ignored => 0
    }
}

fn write_symbol_table(symtab: &SymbolTable, out: &Out, phdrs: &[Phdr],
                      entries: &[SymtabEntry], base: usize, buf: &mut [u8])
{
    use goblin::elf::sym::{ STB_GLOBAL, STB_WEAK };

    let class = out.class;
    let tls_base = tls_segment_base(phdrs);
    let mut enc = Enc::new(buf, class);

    /* row zero is the null symbol; the mapping is already zeroed */
    enc.seek(base + class.sym_size() as usize);

    for entry in entries
    {
        match entry
        {
            SymtabEntry::Local { file, index, name_off } =>
            {
                let local = &symtab.objects[*file as usize].locals[*index];
                let (value, shndx) = match local.section
                {
                    Some(sec) =>
                    {
                        let secref = SecRef { file: *file, sec };
                        let insec = &symtab.objects[*file as usize].sections[sec as usize];
                        let shndx = match insec.out_sec
                        {
                            Some(os) => out.section(os).section_index as u16,
                            None => 0
                        };
                        (input_place_va(symtab, out, secref, local.sym.st_value), shndx)
                    },
                    None => (local.sym.st_value, SHN_ABS)
                };
                enc.put_sym(*name_off, local.sym.st_info, local.sym.st_other,
                            shndx, value, local.sym.st_size);
            },

            SymtabEntry::Global { sym, name_off } =>
            {
                let body = symtab.get(*sym);
                let bind = if body.is_weak { STB_WEAK } else { STB_GLOBAL };
                let info = (bind << 4) | (body.st_type & 0xf);

                let mut value = symtab.symbol_va(out, *sym);
                if body.is_tls
                {
                    /* TLS symbol values are offsets into the TLS segment */
                    value = value.wrapping_sub(tls_base);
                }

                enc.put_sym(*name_off, info, body.visibility, symbol_shndx(symtab, out, body),
                            value, body.size());
            }
        }
    }
}

/* the binary-search table unwinders use to find FDEs without scanning
   .eh_frame. assumes the pcrel sdata4 FDE encoding gcc and clang emit */
fn write_eh_frame_hdr(out: &Out, sec: &OutSection, base: usize, buf: &mut [u8])
{
    let ehframe = match out.ehframe
    {
        Some(id) => id,
        None => return
    };
    let fdes = match &out.section(ehframe).body
    {
        SecBody::EhFrame(body) => &body.fdes,
        _ => return
    };
    let ehframe_va = out.section(ehframe).va;
    let class = out.class;

    let read_i32 = |bytes: &[u8]| -> i32
    {
        let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if class.big_endian { i32::from_be_bytes(arr) } else { i32::from_le_bytes(arr) }
    };

    /* (initial location, fde address), sorted for binary search */
    let mut table: Vec<(u64, u64)> = fdes.iter().filter(|fde| fde.data.len() >= 12)
        .map(|fde|
        {
            let pc_field = ehframe_va + fde.out_off + 8;
            let initial = pc_field.wrapping_add(read_i32(&fde.data[8..12]) as u64);
            (initial, ehframe_va + fde.out_off)
        }).collect();
    table.sort();

    let mut enc = Enc::new(buf, class);
    enc.seek(base);
    enc.put_u8(1);                          /* version */
    enc.put_u8(DW_EH_PE_PCREL_SDATA4);      /* eh_frame_ptr encoding */
    enc.put_u8(DW_EH_PE_UDATA4);            /* fde_count encoding */
    enc.put_u8(DW_EH_PE_DATAREL_SDATA4);    /* table encoding */
    enc.put_word(ehframe_va.wrapping_sub(sec.va + 4) as u32);
    enc.put_word(table.len() as u32);
    for (initial, fde_va) in table
    {
        enc.put_word(initial.wrapping_sub(sec.va) as u32);
        enc.put_word(fde_va.wrapping_sub(sec.va) as u32);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::config::default_config;

    #[test]
    fn output_type_follows_the_link_flavor()
    {
        let mut config = default_config();
        assert_eq!(output_type(&config), ET_EXEC);

        config.relocatable = true;
        assert_eq!(output_type(&config), ET_REL);

        /* -shared takes precedence over -r */
        config.shared = true;
        assert_eq!(output_type(&config), ET_DYN);
    }

    #[test]
    fn tls_base_comes_from_the_tls_header()
    {
        use crate::phdrs::Phdr;
        let phdrs: Vec<Phdr> = Vec::new();
        assert_eq!(tls_segment_base(&phdrs), 0);
    }
}
