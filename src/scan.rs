/* Classify every input relocation before layout runs
 *
 * the output file is mapped at its final size, so the writer must know
 * every GOT slot, PLT trampoline and dynamic relocation before a single
 * address exists. this pass walks all relocations in allocatable input
 * sections and records exactly one effect for each: a GOT or PLT
 * allocation, a copy-relocation slot, a dynamic relocation, or nothing
 * because the value can be resolved in place
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::section_header::SHF_ALLOC;
use goblin::elf::sym::STT_OBJECT;

use super::config::{ Config, Machine };
use super::input::{ Reloc, RelSym, SecRef, SectionKind };
use super::link::Out;
use super::script::Script;
use super::symbol::{ can_be_preempted, SymbolTable, SymId };
use super::synth::{ DynamicReloc, RelocLoc };
use super::target::{ PltNeed, Target, R_MIPS_CALL16, R_MIPS_GOT16, R_MIPS_LO16, R_PPC64_TOC };

/* walk every relocation of every live allocatable input section, in
   object-file order then relocation order, so slot indices come out the
   same on every run */
pub fn scan_relocations(config: &Config, target: &dyn Target, script: &Script,
                        symtab: &mut SymbolTable, out: &mut Out)
{
    for file in 0..symtab.objects.len()
    {
        for sec in 0..symtab.objects[file].sections.len()
        {
            {
                let insec = &symtab.objects[file].sections[sec];
                if insec.live == false || script.is_discarded(&insec.name)
                {
                    continue;
                }
                if insec.header.sh_flags & (SHF_ALLOC as u64) == 0
                {
                    continue;
                }
                match insec.kind
                {
                    SectionKind::Regular | SectionKind::EhFrame => (),
                    _ => continue
                }
            }

            let secref = SecRef { file: file as u32, sec: sec as u32 };
            for r in 0..symtab.objects[file].sections[sec].relocs.len()
            {
                let rel = symtab.objects[file].sections[sec].relocs[r];
                scan_one(config, target, symtab, out, secref, rel);
            }
        }
    }
}

/* the TLS models get their own classification. returns true when the
   relocation has been fully consumed here */
fn handle_tls_relocation(config: &Config, target: &dyn Target, symtab: &mut SymbolTable,
                         out: &mut Out, body: Option<SymId>, rel: &Reloc) -> bool
{
    if target.is_tls_local_dynamic_rel(rel.r_type)
    {
        /* local-dynamic always binds within this module; relaxed links
           rewrite the sequence, dynamic ones share one module-index pair */
        if target.can_relax_tls(config.shared, false, rel.r_type)
        {
            return true;
        }
        if out.add_got_tls_index()
        {
            out.add_dyn_reloc(symtab, DynamicReloc::against(
                target.tls_module_index_rel(), RelocLoc::LocalTlsIndex, None, false, 0));
        }
        return true;
    }

    let id = match body
    {
        Some(id) if symtab.get(id).is_tls => id,
        _ => return false
    };

    if target.is_tls_global_dynamic_rel(rel.r_type)
    {
        let preemptible = can_be_preempted(config, symtab, Some(id));
        if target.can_relax_tls(config.shared, preemptible, rel.r_type) == false
        {
            if out.add_got_dyn_tls_entry(symtab, id)
            {
                out.add_dyn_reloc(symtab, DynamicReloc::against(
                    target.tls_module_index_rel(), RelocLoc::GotTlsIndex(id), Some(id), false, 0));
                out.add_dyn_reloc(symtab, DynamicReloc::against(
                    target.tls_offset_rel(), RelocLoc::GotTlsOffset(id), Some(id), false, 0));
            }
            return true;
        }
        if preemptible == false
        {
            return true;
        }
    }

    /* other TLS-dynamic relocations fall through to the general path;
       everything else against a TLS symbol resolves in place */
    target.is_tls_dyn_rel(rel.r_type) == false
}

fn scan_one(config: &Config, target: &dyn Target, symtab: &mut SymbolTable,
            out: &mut Out, secref: SecRef, rel: Reloc)
{
    /* hints only describe optimization opportunities */
    if target.is_hint_rel(rel.r_type)
    {
        return;
    }

    /* GOT-relative addressing needs the GOT's address even if no slot is
       ever allocated, so remember to emit the section */
    if target.is_got_relative(rel.r_type)
    {
        out.has_got_off_rel = true;
    }

    /* resolve the reference to the body that won resolution */
    let referenced = symtab.objects[secref.file as usize].get_symbol_body(&rel);
    let body = referenced.map(|id| symtab.repl(id));

    /* a reference satisfied by a shared library pins that library in
       even under --as-needed. weak references don't count */
    if let Some(id) = body
    {
        let sym = symtab.get(id);
        if sym.is_weak == false
        {
            if let super::symbol::SymbolBody::Shared { file, .. } = sym.body
            {
                symtab.shared[file as usize].is_used = true;
            }
        }
    }

    let cbp = can_be_preempted(config, symtab, body);

    if handle_tls_relocation(config, target, symtab, out, body, &rel)
    {
        return;
    }

    /* some targets pair an in-place relocation with a RELATIVE entry at
       the same spot; note it and keep classifying */
    if target.needs_dyn_relative(rel.r_type)
    {
        out.add_dyn_reloc(symtab, DynamicReloc::against(
            target.relative_rel(),
            RelocLoc::InSection { sec: secref, offset: rel.offset },
            body, true, rel.addend));
    }

    /* MIPS gives GOT entries to non-preemptible locals addressed through
       GOT16/CALL16. allocation is per relocation until a page-keyed
       dedup can run after layout */
    if config.machine == Machine::Mips && cbp == false
        && (rel.r_type == R_MIPS_GOT16 || rel.r_type == R_MIPS_CALL16)
    {
        out.add_mips_local_got_entry();
        return;
    }

    /* a shared data symbol referenced by an absolute relocation must be
       copied into our .bss so the address is fixed at link time */
    if let Some(id) = body
    {
        if symtab.get(id).is_shared()
        {
            if symtab.get(id).needs_copy()
            {
                return;
            }
            if target.needs_copy_rel(rel.r_type, symtab.get(id).st_type == STT_OBJECT)
            {
                symtab.get_mut(id).needs_copy_or_plt_addr = true;
                out.add_dyn_reloc(symtab, DynamicReloc::against(
                    target.copy_rel(), RelocLoc::Bss(id), Some(id), false, 0));
                return;
            }
        }
    }

    /* every reference to an ifunc goes through the PLT, locals included */
    if let Some(id) = body
    {
        if symtab.get(id).is_gnu_ifunc()
        {
            if symtab.get(id).is_in_plt()
            {
                return;
            }
            out.add_plt_entry(symtab, id);
            if target.use_lazy_binding()
            {
                out.add_gotplt_entry(symtab, id);
                let rtype = if cbp { target.plt_rel() } else { target.irelative_rel() };
                out.add_plt_reloc(symtab, DynamicReloc::against(
                    rtype, RelocLoc::GotPlt(id), Some(id), cbp == false, 0));
            }
            else
            {
                out.add_got_entry(symtab, id);
                let rtype = if cbp { target.plt_rel() } else { target.irelative_rel() };
                out.add_dyn_reloc(symtab, DynamicReloc::against(
                    rtype, RelocLoc::Got(id), Some(id), cbp == false, 0));
            }
            return;
        }
    }

    /* PLT-needing relocations allocate a trampoline plus its slot */
    if let Some(id) = body
    {
        let need_plt =
        {
            let sym = symtab.get(id);
            target.needs_plt(rel.r_type, sym.is_shared() && sym.is_func(), cbp)
        };
        if need_plt != PltNeed::No
        {
            if need_plt == PltNeed::Implicit
            {
                symtab.get_mut(id).needs_copy_or_plt_addr = true;
            }
            if symtab.get(id).is_in_plt()
            {
                return;
            }
            out.add_plt_entry(symtab, id);

            if target.use_lazy_binding()
            {
                out.add_gotplt_entry(symtab, id);
                out.add_plt_reloc(symtab, DynamicReloc::against(
                    target.plt_rel(), RelocLoc::GotPlt(id), Some(id), false, 0));
            }
            else
            {
                if symtab.get(id).is_in_got()
                {
                    return;
                }
                out.add_got_entry(symtab, id);
                out.add_dyn_reloc(symtab, DynamicReloc::against(
                    target.got_rel(), RelocLoc::Got(id), Some(id), false, 0));
            }
            return;
        }
    }

    /* GOT-needing relocations allocate one slot per symbol */
    if let Some(id) = body
    {
        let relax = target.can_relax_tls(config.shared, cbp, rel.r_type);
        if target.needs_got(rel.r_type, relax)
        {
            if symtab.get(id).is_in_got()
            {
                return;
            }
            out.add_got_entry(symtab, id);

            if config.machine == Machine::Mips
            {
                /* MIPS GOT entries are filled from the dynamic symbol
                   table, not from relocation records */
                symtab.get_mut(id).must_be_in_dynsym = true;
                return;
            }

            let dynrel = config.shared && target.is_rel_relative(rel.r_type) == false
                         && target.is_size_rel(rel.r_type) == false;
            if cbp || dynrel
            {
                let rtype = if cbp
                {
                    if symtab.get(id).is_tls { target.tls_got_rel() } else { target.got_rel() }
                }
                else
                {
                    target.relative_rel()
                };
                out.add_dyn_reloc(symtab, DynamicReloc::against(
                    rtype, RelocLoc::Got(id), Some(id), cbp == false, 0));
            }
            return;
        }
    }

    if config.machine == Machine::Mips
    {
        /* LO16 is the pair half of GOT16/HI16; all the work happened on
           the first half */
        if rel.r_type == R_MIPS_LO16
        {
            return;
        }
        /* _gp_disp and __gnu_local_gp describe gp-relative distances the
           static linker fully resolves */
        if let Some(id) = body
        {
            let name = symtab.get(id).name.as_str();
            if name == "_gp_disp" || name == "__gnu_local_gp"
            {
                return;
            }
        }
    }

    /* a preemptible symbol's value is unknowable here: hand the whole
       relocation to the dynamic linker */
    if cbp
    {
        out.add_dyn_reloc(symtab, DynamicReloc::against(
            target.get_dyn_rel(rel.r_type),
            RelocLoc::InSection { sec: secref, offset: rel.offset },
            body, false, rel.addend));
        return;
    }

    /* the final value is known. fixed-position output, or a relocation
       that only depends on distances or sizes, resolves in place */
    if config.shared == false || target.is_rel_relative(rel.r_type) || target.is_size_rel(rel.r_type)
    {
        return;
    }

    /* position-independent output: the value is final except for the load
       address, so emit a RELATIVE and let the loader add the base */
    if config.machine == Machine::Ppc64 && rel.r_type == R_PPC64_TOC
    {
        out.add_dyn_reloc(symtab, DynamicReloc::toc_relative(
            target.relative_rel(),
            RelocLoc::InSection { sec: secref, offset: rel.offset },
            rel.addend));
        return;
    }

    if let Some(id) = body
    {
        out.add_dyn_reloc(symtab, DynamicReloc::against(
            target.relative_rel(),
            RelocLoc::InSection { sec: secref, offset: rel.offset },
            Some(id), true, rel.addend));
        return;
    }

    /* no global body: resolve through the local's section and offset,
       folding section-symbol addends into the offset */
    if let RelSym::Local { section, value, is_section } = rel.sym
    {
        let target_sec = SecRef { file: secref.file, sec: section };
        let (target_off, addend) = if is_section
        {
            (value.wrapping_add(rel.addend as u64), 0)
        }
        else
        {
            (value, rel.addend)
        };
        out.add_dyn_reloc(symtab, DynamicReloc::against_local(
            target.relative_rel(),
            RelocLoc::InSection { sec: secref, offset: rel.offset },
            target_sec, target_off, addend));
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use goblin::elf::reloc::{ R_X86_64_64, R_X86_64_GOTPCREL, R_X86_64_PC32, R_X86_64_PLT32,
                              R_X86_64_IRELATIVE, R_X86_64_TLSGD, R_X86_64_COPY,
                              R_X86_64_DTPMOD64, R_X86_64_DTPOFF64 };
    use goblin::elf::section_header::{ SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS };
    use goblin::elf::sym::{ STT_FUNC, STT_GNU_IFUNC, STT_OBJECT };
    use crate::config::default_config;
    use crate::input::{ InputSection, ObjectFile, SharedFile };
    use crate::symbol::SymbolBody;
    use crate::target::X86_64Target;

    /* one object file holding one executable .text section with the
       given relocations */
    fn harness(relocs: Vec<Reloc>) -> SymbolTable
    {
        let mut symtab = SymbolTable::new();
        let mut file = ObjectFile::new("test.o");

        let mut header = SectionHeader::default();
        header.sh_type = SHT_PROGBITS;
        header.sh_flags = (SHF_ALLOC | SHF_EXECINSTR) as u64;
        header.sh_size = 64;
        header.sh_addralign = 16;
        let mut text = InputSection::new(".text", header, vec![0; 64], SectionKind::Regular);
        text.relocs = relocs;
        file.sections.push(text);
        symtab.add_object(file);
        symtab
    }

    fn run_scan(config: &Config, symtab: &mut SymbolTable) -> Out
    {
        let target = X86_64Target;
        let script = Script::new();
        let mut out = Out::for_link(config, &target);
        scan_relocations(config, &target, &script, symtab, &mut out);
        out
    }

    fn rel(r_type: u32, sym: RelSym, offset: u64, addend: i64) -> Reloc
    {
        Reloc { r_type, offset, addend, sym }
    }

    #[test]
    fn pc_relative_against_local_needs_nothing_in_a_dso()
    {
        let mut config = default_config();
        config.shared = true;

        let mut symtab = harness(Vec::new());
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_PC32, RelSym::Local { section: 0, value: 8, is_section: false }, 0, -4)
        ];

        let out = run_scan(&config, &mut symtab);
        assert_eq!(out.rela_dyn_relocs().len(), 0);
        assert!(out.got_section().is_empty());
    }

    #[test]
    fn absolute_against_local_becomes_relative_in_a_dso()
    {
        let mut config = default_config();
        config.shared = true;

        let mut symtab = harness(vec!
        [
            rel(R_X86_64_64, RelSym::Local { section: 0, value: 8, is_section: true }, 16, 2)
        ]);

        let out = run_scan(&config, &mut symtab);
        let relocs = out.rela_dyn_relocs();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].r_type, goblin::elf::reloc::R_X86_64_RELATIVE);
        /* section-symbol addends fold into the target offset */
        assert_eq!(relocs[0].target_off, 10);
        assert_eq!(relocs[0].addend, 0);
        assert!(relocs[0].sym.is_none());
    }

    #[test]
    fn copy_relocation_for_shared_data()
    {
        let config = default_config();
        let mut symtab = harness(Vec::new());
        let file = symtab.add_shared(SharedFile::new("libc.so.6", "libc.so.6", false));
        let environ = symtab.define("environ", SymbolBody::Shared
        {
            file, value: 0x80, size: 8, sec_align: 8, offset_in_bss: 0
        });
        symtab.get_mut(environ).st_type = STT_OBJECT;
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_64, RelSym::Global(environ), 0, 0)
        ];

        let out = run_scan(&config, &mut symtab);
        assert!(symtab.get(environ).needs_copy_or_plt_addr);
        assert!(symtab.get(environ).needs_copy());
        let relocs = out.rela_dyn_relocs();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].r_type, R_X86_64_COPY);
        assert!(matches!(relocs[0].loc, RelocLoc::Bss(id) if id == environ));
    }

    #[test]
    fn ifunc_in_a_static_link_gets_irelative_in_rela_plt()
    {
        let config = default_config();
        let mut symtab = harness(Vec::new());
        let resolver = symtab.define("fast_memcpy", SymbolBody::DefinedRegular
        {
            section: Some(SecRef { file: 0, sec: 0 }), value: 0x10, size: 16
        });
        symtab.get_mut(resolver).st_type = STT_GNU_IFUNC;
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_PC32, RelSym::Global(resolver), 0, -4),
            rel(R_X86_64_PC32, RelSym::Global(resolver), 8, -4)
        ];

        let out = run_scan(&config, &mut symtab);
        assert_eq!(symtab.get(resolver).plt_index, Some(0));
        assert_eq!(symtab.get(resolver).gotplt_index, Some(0));

        /* two references, one trampoline: the scan is idempotent per symbol */
        let relocs = out.rela_plt_relocs();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].r_type, R_X86_64_IRELATIVE);
        assert!(relocs[0].use_sym_va);
    }

    #[test]
    fn plt_for_preemptible_call()
    {
        let config = default_config();
        let mut symtab = harness(Vec::new());
        let puts = symtab.insert("puts");
        symtab.get_mut(puts).st_type = STT_FUNC;
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_PLT32, RelSym::Global(puts), 0, -4)
        ];

        let out = run_scan(&config, &mut symtab);
        assert_eq!(symtab.get(puts).plt_index, Some(0));
        let relocs = out.rela_plt_relocs();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].r_type, goblin::elf::reloc::R_X86_64_JUMP_SLOT);
    }

    #[test]
    fn got_slot_for_preemptible_data()
    {
        let config = default_config();
        let mut symtab = harness(Vec::new());
        let stderr_sym = symtab.insert("stderr");
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_GOTPCREL, RelSym::Global(stderr_sym), 0, -4),
            rel(R_X86_64_GOTPCREL, RelSym::Global(stderr_sym), 8, -4)
        ];

        let out = run_scan(&config, &mut symtab);
        assert_eq!(symtab.get(stderr_sym).got_index, Some(0));
        assert_eq!(out.got_section().entry_count(), 1);

        let relocs = out.rela_dyn_relocs();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].r_type, goblin::elf::reloc::R_X86_64_GLOB_DAT);
        assert_eq!(relocs[0].use_sym_va, false);
    }

    #[test]
    fn global_dynamic_tls_emits_a_module_and_offset_pair()
    {
        let mut config = default_config();
        config.shared = true;

        let mut symtab = harness(Vec::new());
        let tls_var = symtab.define("counter", SymbolBody::DefinedRegular
        {
            section: Some(SecRef { file: 0, sec: 0 }), value: 0, size: 8
        });
        symtab.get_mut(tls_var).is_tls = true;
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_TLSGD, RelSym::Global(tls_var), 0, -4),
            rel(R_X86_64_TLSGD, RelSym::Global(tls_var), 16, -4)
        ];

        let out = run_scan(&config, &mut symtab);
        /* one pair of GOT slots despite two references */
        assert_eq!(out.got_section().entry_count(), 2);

        let relocs = out.rela_dyn_relocs();
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].r_type, R_X86_64_DTPMOD64);
        assert_eq!(relocs[1].r_type, R_X86_64_DTPOFF64);
    }

    #[test]
    fn as_needed_library_marked_used_by_reference()
    {
        let config = default_config();
        let mut symtab = harness(Vec::new());
        let file = symtab.add_shared(SharedFile::new("libm.so.6", "libm.so.6", true));
        assert_eq!(symtab.shared[0].is_used, false);

        let sin = symtab.define("sin", SymbolBody::Shared
        {
            file, value: 0x100, size: 0, sec_align: 16, offset_in_bss: 0
        });
        symtab.get_mut(sin).st_type = STT_FUNC;
        symtab.objects[0].sections[0].relocs = vec!
        [
            rel(R_X86_64_PLT32, RelSym::Global(sin), 0, -4)
        ];

        run_scan(&config, &mut symtab);
        assert_eq!(symtab.shared[0].is_used, true);
    }

    #[test]
    fn non_alloc_sections_are_not_scanned()
    {
        let config = default_config();
        let mut symtab = harness(Vec::new());
        let sym = symtab.insert("dangling");
        {
            let insec = &mut symtab.objects[0].sections[0];
            insec.header.sh_flags = 0;
            insec.relocs = vec![rel(R_X86_64_GOTPCREL, RelSym::Global(sym), 0, -4)];
        }

        let out = run_scan(&config, &mut symtab);
        assert!(out.got_section().is_empty());
        assert_eq!(out.rela_dyn_relocs().len(), 0);
    }
}
