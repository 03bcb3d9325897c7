/* Per-architecture knowledge the output core consults
 *
 * the scanner and writer never test relocation numbers themselves: they
 * ask the target which effects a relocation has and which relocation
 * types to emit. adding an architecture means implementing this trait
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::reloc::
{
    R_X86_64_16, R_X86_64_32, R_X86_64_32S, R_X86_64_64, R_X86_64_8,
    R_X86_64_COPY, R_X86_64_DTPMOD64, R_X86_64_DTPOFF32, R_X86_64_DTPOFF64,
    R_X86_64_GLOB_DAT, R_X86_64_GOTOFF64, R_X86_64_GOTPCREL, R_X86_64_GOTTPOFF,
    R_X86_64_IRELATIVE, R_X86_64_JUMP_SLOT, R_X86_64_PC16, R_X86_64_PC32,
    R_X86_64_PC64, R_X86_64_PC8, R_X86_64_PLT32, R_X86_64_RELATIVE,
    R_X86_64_SIZE32, R_X86_64_SIZE64, R_X86_64_TLSGD, R_X86_64_TLSLD,
    R_X86_64_TPOFF64
};

use super::config::{ Config, Machine };

/* i386 relocation types the i386 target needs; goblin doesn't export these */
pub const R_386_32: u32 = 1;
pub const R_386_PC32: u32 = 2;
pub const R_386_GOT32: u32 = 3;
pub const R_386_PLT32: u32 = 4;
pub const R_386_COPY: u32 = 5;
pub const R_386_GLOB_DAT: u32 = 6;
pub const R_386_JMP_SLOT: u32 = 7;
pub const R_386_RELATIVE: u32 = 8;
pub const R_386_GOTOFF: u32 = 9;
pub const R_386_GOTPC: u32 = 10;
pub const R_386_TLS_TPOFF: u32 = 14;
pub const R_386_TLS_IE: u32 = 15;
pub const R_386_TLS_GD: u32 = 18;
pub const R_386_TLS_LDM: u32 = 19;
pub const R_386_TLS_DTPMOD32: u32 = 35;
pub const R_386_TLS_DTPOFF32: u32 = 36;
pub const R_386_IRELATIVE: u32 = 42;

/* MIPS relocation types, same story */
pub const R_MIPS_32: u32 = 2;
pub const R_MIPS_REL32: u32 = 3;
pub const R_MIPS_26: u32 = 4;
pub const R_MIPS_HI16: u32 = 5;
pub const R_MIPS_LO16: u32 = 6;
pub const R_MIPS_GOT16: u32 = 9;
pub const R_MIPS_CALL16: u32 = 11;
pub const R_MIPS_JALR: u32 = 37;
pub const R_MIPS_GLOB_DAT: u32 = 51;
pub const R_MIPS_JUMP_SLOT: u32 = 127;
pub const R_MIPS_COPY: u32 = 126;
pub const R_MIPS_TLS_DTPMOD32: u32 = 38;
pub const R_MIPS_TLS_DTPREL32: u32 = 39;
pub const R_MIPS_TLS_TPREL32: u32 = 47;

/* PPC64 relocation types */
pub const R_PPC64_ADDR64: u32 = 38;
pub const R_PPC64_COPY: u32 = 19;
pub const R_PPC64_GLOB_DAT: u32 = 20;
pub const R_PPC64_JMP_SLOT: u32 = 21;
pub const R_PPC64_RELATIVE: u32 = 22;
pub const R_PPC64_TOC: u32 = 51;
pub const R_PPC64_TOC16: u32 = 47;
pub const R_PPC64_REL24: u32 = 10;
pub const R_PPC64_REL32: u32 = 26;
pub const R_PPC64_REL64: u32 = 44;
pub const R_PPC64_DTPMOD64: u32 = 68;
pub const R_PPC64_DTPREL64: u32 = 78;
pub const R_PPC64_TPREL64: u32 = 73;

/* MIPS e_flags the output header carries by default */
pub const EF_MIPS_PIC: u32 = 2;
pub const EF_MIPS_CPIC: u32 = 4;
pub const EF_MIPS_ABI_O32: u32 = 0x0000_1000;
pub const EF_MIPS_ARCH_32R2: u32 = 0x7000_0000;

/* does a relocation want a PLT entry, and how badly */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PltNeed
{
    No,

    /* the code sequence doesn't go through the PLT, but the symbol is a
       shared function whose address was taken: give it a PLT address and
       make that its canonical address everywhere */
    Implicit,

    /* the code sequence expects a PLT trampoline */
    Explicit
}

pub trait Target
{
    fn page_size(&self) -> u64 { 4096 }
    fn va_start(&self, shared: bool) -> u64;
    fn use_lazy_binding(&self) -> bool { true }

    /* relocation numbers the writer emits on this architecture */
    fn copy_rel(&self) -> u32;
    fn got_rel(&self) -> u32;
    fn plt_rel(&self) -> u32;
    fn relative_rel(&self) -> u32;
    fn irelative_rel(&self) -> u32;
    fn tls_got_rel(&self) -> u32 { 0 }
    fn tls_module_index_rel(&self) -> u32 { 0 }
    fn tls_offset_rel(&self) -> u32 { 0 }

    fn plt_header_size(&self) -> u64 { 16 }
    fn plt_entry_size(&self) -> u64 { 16 }

    /* classification predicates over input relocation types */
    fn is_hint_rel(&self, _rtype: u32) -> bool { false }
    fn is_got_relative(&self, _rtype: u32) -> bool { false }
    fn is_rel_relative(&self, _rtype: u32) -> bool { false }
    fn is_size_rel(&self, _rtype: u32) -> bool { false }
    fn needs_dyn_relative(&self, _rtype: u32) -> bool { false }
    fn is_tls_local_dynamic_rel(&self, _rtype: u32) -> bool { false }
    fn is_tls_global_dynamic_rel(&self, _rtype: u32) -> bool { false }
    fn is_tls_dyn_rel(&self, _rtype: u32) -> bool { false }

    /* can the TLS access sequence be rewritten to skip the dynamic path?
       only when the definition is fixed at link time */
    fn can_relax_tls(&self, shared_output: bool, preemptible: bool, _rtype: u32) -> bool
    {
        shared_output == false && preemptible == false
    }

    /* => is_object = the symbol is a data symbol from a shared library */
    fn needs_copy_rel(&self, _rtype: u32, _is_object: bool) -> bool { false }

    /* => relax_tls = the TLS sequence against this symbol will be relaxed */
    fn needs_got(&self, _rtype: u32, _relax_tls: bool) -> bool { false }

    /* => shared_func = symbol is a function from a shared library */
    fn needs_plt(&self, _rtype: u32, _shared_func: bool, _preemptible: bool) -> PltNeed
    {
        PltNeed::No
    }

    /* the relocation to hand the dynamic linker when the input relocation
       must be applied at load time against a preemptible symbol */
    fn get_dyn_rel(&self, rtype: u32) -> u32 { rtype }

    /* machine-specific output header flags */
    fn e_flags(&self, _config: &Config) -> u32 { 0 }

    /* fill in the PLT header and one trampoline. buffers are exactly
       plt_header_size()/plt_entry_size() bytes */
    fn write_plt_header(&self, _buf: &mut [u8], _gotplt_va: u64, _plt_va: u64) {}
    fn write_plt_entry(&self, _buf: &mut [u8], _got_entry_va: u64, _plt_entry_va: u64,
                       _plt_base_va: u64, _index: u32) {}

    /* the value a fresh .got.plt slot holds before the first call: where
       in the trampoline the lazy resolver path begins */
    fn got_plt_entry_value(&self, plt_entry_va: u64) -> u64 { plt_entry_va }
}

/* ------------------------------------------------------------------- */

pub struct X86_64Target;

impl Target for X86_64Target
{
    fn va_start(&self, shared: bool) -> u64 { if shared { 0 } else { 0x400000 } }

    fn copy_rel(&self) -> u32 { R_X86_64_COPY }
    fn got_rel(&self) -> u32 { R_X86_64_GLOB_DAT }
    fn plt_rel(&self) -> u32 { R_X86_64_JUMP_SLOT }
    fn relative_rel(&self) -> u32 { R_X86_64_RELATIVE }
    fn irelative_rel(&self) -> u32 { R_X86_64_IRELATIVE }
    fn tls_got_rel(&self) -> u32 { R_X86_64_TPOFF64 }
    fn tls_module_index_rel(&self) -> u32 { R_X86_64_DTPMOD64 }
    fn tls_offset_rel(&self) -> u32 { R_X86_64_DTPOFF64 }

    fn is_got_relative(&self, rtype: u32) -> bool { rtype == R_X86_64_GOTOFF64 }

    fn is_rel_relative(&self, rtype: u32) -> bool
    {
        matches!(rtype, R_X86_64_PC8 | R_X86_64_PC16 | R_X86_64_PC32 | R_X86_64_PC64
                      | R_X86_64_PLT32 | R_X86_64_GOTPCREL | R_X86_64_GOTTPOFF
                      | R_X86_64_DTPOFF32 | R_X86_64_DTPOFF64)
    }

    fn is_size_rel(&self, rtype: u32) -> bool
    {
        rtype == R_X86_64_SIZE32 || rtype == R_X86_64_SIZE64
    }

    fn is_tls_local_dynamic_rel(&self, rtype: u32) -> bool { rtype == R_X86_64_TLSLD }
    fn is_tls_global_dynamic_rel(&self, rtype: u32) -> bool { rtype == R_X86_64_TLSGD }

    fn is_tls_dyn_rel(&self, rtype: u32) -> bool
    {
        rtype == R_X86_64_GOTTPOFF || rtype == R_X86_64_TLSGD
    }

    fn needs_copy_rel(&self, rtype: u32, is_object: bool) -> bool
    {
        if is_object == false
        {
            return false;
        }
        matches!(rtype, R_X86_64_8 | R_X86_64_16 | R_X86_64_32 | R_X86_64_32S
                      | R_X86_64_64 | R_X86_64_PC32)
    }

    fn needs_got(&self, rtype: u32, relax_tls: bool) -> bool
    {
        if rtype == R_X86_64_GOTTPOFF
        {
            return relax_tls == false;
        }
        rtype == R_X86_64_GOTPCREL
    }

    fn needs_plt(&self, rtype: u32, shared_func: bool, preemptible: bool) -> PltNeed
    {
        match rtype
        {
            /* the address of a shared function must be its plt entry so
               pointer comparisons agree across modules */
            R_X86_64_32 | R_X86_64_64 | R_X86_64_PC32 if shared_func => PltNeed::Implicit,
            R_X86_64_PLT32 if preemptible => PltNeed::Explicit,
            _ => PltNeed::No
        }
    }

    /* lazy-binding header: push the link map, jump through the resolver
       slot, pad with a nop to 16 bytes */
    fn write_plt_header(&self, buf: &mut [u8], gotplt_va: u64, plt_va: u64)
    {
        buf[..16].copy_from_slice(&[
            0xff, 0x35, 0, 0, 0, 0,         /* pushq GOTPLT+8(%rip) */
            0xff, 0x25, 0, 0, 0, 0,         /* jmpq *GOTPLT+16(%rip) */
            0x0f, 0x1f, 0x40, 0x00          /* nop */
        ]);
        let push = (gotplt_va + 8).wrapping_sub(plt_va + 6) as u32;
        let jmp = (gotplt_va + 16).wrapping_sub(plt_va + 12) as u32;
        buf[2..6].copy_from_slice(&push.to_le_bytes());
        buf[8..12].copy_from_slice(&jmp.to_le_bytes());
    }

    fn write_plt_entry(&self, buf: &mut [u8], got_entry_va: u64, plt_entry_va: u64,
                       plt_base_va: u64, index: u32)
    {
        buf[..16].copy_from_slice(&[
            0xff, 0x25, 0, 0, 0, 0,         /* jmpq *got(%rip) */
            0x68, 0, 0, 0, 0,               /* pushq <relocation index> */
            0xe9, 0, 0, 0, 0                /* jmp plt[0] */
        ]);
        let jmp = got_entry_va.wrapping_sub(plt_entry_va + 6) as u32;
        let back = plt_base_va.wrapping_sub(plt_entry_va + 16) as u32;
        buf[2..6].copy_from_slice(&jmp.to_le_bytes());
        buf[7..11].copy_from_slice(&index.to_le_bytes());
        buf[12..16].copy_from_slice(&back.to_le_bytes());
    }

    /* skip the entry's initial jmp so the first call walks the lazy
       resolver: push index, jump to the header */
    fn got_plt_entry_value(&self, plt_entry_va: u64) -> u64 { plt_entry_va + 6 }
}

/* ------------------------------------------------------------------- */

pub struct I386Target;

impl Target for I386Target
{
    fn va_start(&self, shared: bool) -> u64 { if shared { 0 } else { 0x08048000 } }

    fn copy_rel(&self) -> u32 { R_386_COPY }
    fn got_rel(&self) -> u32 { R_386_GLOB_DAT }
    fn plt_rel(&self) -> u32 { R_386_JMP_SLOT }
    fn relative_rel(&self) -> u32 { R_386_RELATIVE }
    fn irelative_rel(&self) -> u32 { R_386_IRELATIVE }
    fn tls_got_rel(&self) -> u32 { R_386_TLS_TPOFF }
    fn tls_module_index_rel(&self) -> u32 { R_386_TLS_DTPMOD32 }
    fn tls_offset_rel(&self) -> u32 { R_386_TLS_DTPOFF32 }

    /* GOTOFF addressing works even with an empty GOT, so its presence
       alone forces the section out */
    fn is_got_relative(&self, rtype: u32) -> bool
    {
        rtype == R_386_GOTOFF || rtype == R_386_GOTPC
    }

    fn is_rel_relative(&self, rtype: u32) -> bool
    {
        rtype == R_386_PC32 || rtype == R_386_PLT32 || rtype == R_386_GOTPC
    }

    fn is_tls_local_dynamic_rel(&self, rtype: u32) -> bool { rtype == R_386_TLS_LDM }
    fn is_tls_global_dynamic_rel(&self, rtype: u32) -> bool { rtype == R_386_TLS_GD }
    fn is_tls_dyn_rel(&self, rtype: u32) -> bool
    {
        rtype == R_386_TLS_GD || rtype == R_386_TLS_IE
    }

    fn needs_copy_rel(&self, rtype: u32, is_object: bool) -> bool
    {
        is_object && rtype == R_386_32
    }

    fn needs_got(&self, rtype: u32, _relax_tls: bool) -> bool { rtype == R_386_GOT32 }

    fn needs_plt(&self, rtype: u32, shared_func: bool, preemptible: bool) -> PltNeed
    {
        match rtype
        {
            R_386_32 | R_386_PC32 if shared_func => PltNeed::Implicit,
            R_386_PLT32 if preemptible => PltNeed::Explicit,
            _ => PltNeed::No
        }
    }
}

/* ------------------------------------------------------------------- */

pub struct MipsTarget;

impl Target for MipsTarget
{
    fn page_size(&self) -> u64 { 65536 }
    fn va_start(&self, shared: bool) -> u64 { if shared { 0 } else { 0x400000 } }
    fn use_lazy_binding(&self) -> bool { false }

    fn copy_rel(&self) -> u32 { R_MIPS_COPY }
    fn got_rel(&self) -> u32 { R_MIPS_GLOB_DAT }
    fn plt_rel(&self) -> u32 { R_MIPS_JUMP_SLOT }
    fn relative_rel(&self) -> u32 { R_MIPS_REL32 }
    fn irelative_rel(&self) -> u32 { R_MIPS_REL32 }
    fn tls_module_index_rel(&self) -> u32 { R_MIPS_TLS_DTPMOD32 }
    fn tls_offset_rel(&self) -> u32 { R_MIPS_TLS_DTPREL32 }
    fn tls_got_rel(&self) -> u32 { R_MIPS_TLS_TPREL32 }

    /* jump-register hints carry no payload */
    fn is_hint_rel(&self, rtype: u32) -> bool { rtype == R_MIPS_JALR }

    fn is_rel_relative(&self, rtype: u32) -> bool { rtype == R_MIPS_26 }

    fn needs_got(&self, rtype: u32, _relax_tls: bool) -> bool
    {
        rtype == R_MIPS_GOT16 || rtype == R_MIPS_CALL16
    }

    fn get_dyn_rel(&self, _rtype: u32) -> u32 { R_MIPS_REL32 }

    fn e_flags(&self, config: &Config) -> u32
    {
        /* ELF flags should reflect the input objects and emulation;
           hard-coded O32 defaults stand in for now */
        let mut v = EF_MIPS_ABI_O32 | EF_MIPS_CPIC | EF_MIPS_ARCH_32R2;
        if config.shared
        {
            v = v | EF_MIPS_PIC;
        }
        v
    }
}

/* ------------------------------------------------------------------- */

pub struct Ppc64Target;

impl Target for Ppc64Target
{
    fn va_start(&self, shared: bool) -> u64 { if shared { 0 } else { 0x10000000 } }
    fn use_lazy_binding(&self) -> bool { false }

    fn copy_rel(&self) -> u32 { R_PPC64_COPY }
    fn got_rel(&self) -> u32 { R_PPC64_GLOB_DAT }
    fn plt_rel(&self) -> u32 { R_PPC64_JMP_SLOT }
    fn relative_rel(&self) -> u32 { R_PPC64_RELATIVE }
    fn irelative_rel(&self) -> u32 { R_PPC64_RELATIVE }
    fn tls_module_index_rel(&self) -> u32 { R_PPC64_DTPMOD64 }
    fn tls_offset_rel(&self) -> u32 { R_PPC64_DTPREL64 }
    fn tls_got_rel(&self) -> u32 { R_PPC64_TPREL64 }

    fn plt_entry_size(&self) -> u64 { 32 }
    fn plt_header_size(&self) -> u64 { 0 }

    fn is_rel_relative(&self, rtype: u32) -> bool
    {
        matches!(rtype, R_PPC64_REL24 | R_PPC64_REL32 | R_PPC64_REL64 | R_PPC64_TOC16)
    }

    fn needs_plt(&self, rtype: u32, shared_func: bool, preemptible: bool) -> PltNeed
    {
        match rtype
        {
            R_PPC64_REL24 if preemptible => PltNeed::Explicit,
            R_PPC64_ADDR64 if shared_func => PltNeed::Implicit,
            _ => PltNeed::No
        }
    }
}

/* hand back the target capability for the configured machine */
pub fn target_for(config: &Config) -> Box<dyn Target>
{
    match config.machine
    {
        Machine::X86_64 => Box::new(X86_64Target),
        Machine::I386 => Box::new(I386Target),
        Machine::Mips => Box::new(MipsTarget),
        Machine::Ppc64 => Box::new(Ppc64Target),

        /* AMDGPU only diverges in its program-header kinds, which the
           program-header builder handles; code generation is x86-64 shaped */
        Machine::Amdgpu => Box::new(X86_64Target)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn x86_64_classifies_pc_relative()
    {
        let t = X86_64Target;
        assert!(t.is_rel_relative(R_X86_64_PC32));
        assert!(t.is_rel_relative(R_X86_64_PLT32));
        assert!(t.is_rel_relative(R_X86_64_64) == false);
        assert!(t.is_size_rel(R_X86_64_SIZE64));
    }

    #[test]
    fn x86_64_copy_relocs_are_data_only()
    {
        let t = X86_64Target;
        assert!(t.needs_copy_rel(R_X86_64_64, true));
        assert!(t.needs_copy_rel(R_X86_64_64, false) == false);
        assert!(t.needs_copy_rel(R_X86_64_GOTPCREL, true) == false);
    }

    #[test]
    fn x86_64_plt_decisions()
    {
        let t = X86_64Target;
        assert_eq!(t.needs_plt(R_X86_64_PLT32, false, true), PltNeed::Explicit);
        assert_eq!(t.needs_plt(R_X86_64_PLT32, false, false), PltNeed::No);
        assert_eq!(t.needs_plt(R_X86_64_64, true, true), PltNeed::Implicit);
    }

    #[test]
    fn x86_64_tls_relax_only_in_fixed_links()
    {
        let t = X86_64Target;
        assert!(t.can_relax_tls(false, false, R_X86_64_TLSGD));
        assert!(t.can_relax_tls(true, false, R_X86_64_TLSGD) == false);
        assert!(t.can_relax_tls(false, true, R_X86_64_TLSGD) == false);
    }

    #[test]
    fn plt_entry_encodes_rip_relative_slots()
    {
        let t = X86_64Target;
        let mut buf = [0u8; 16];
        /* plt entry at 0x1010 jumping through a got.plt slot at 0x3018 */
        t.write_plt_entry(&mut buf, 0x3018, 0x1010, 0x1000, 2);
        assert_eq!(buf[0], 0xff);
        assert_eq!(buf[1], 0x25);
        let disp = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        assert_eq!(disp, 0x3018 - (0x1010 + 6));
        let idx = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]);
        assert_eq!(idx, 2);
    }

    #[test]
    fn mips_hints_and_got_forms()
    {
        let t = MipsTarget;
        assert!(t.is_hint_rel(R_MIPS_JALR));
        assert!(t.needs_got(R_MIPS_GOT16, false));
        assert!(t.needs_got(R_MIPS_CALL16, false));
        assert_eq!(t.get_dyn_rel(R_MIPS_32), R_MIPS_REL32);
        assert_eq!(t.page_size(), 65536);
    }
}
