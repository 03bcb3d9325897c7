/* Build the program-header table
 *
 * walk the sorted allocatable sections and group them into segments: one
 * PT_LOAD per run of identical permissions, a PT_TLS gathering the TLS
 * image, PT_GNU_RELRO over the sealed-after-startup pages, and the
 * bookkeeping headers the loader expects around them
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::program_header::{ PF_R, PF_W, PF_X, PT_DYNAMIC, PT_GNU_EH_FRAME,
                                   PT_GNU_RELRO, PT_GNU_STACK, PT_INTERP, PT_LOAD,
                                   PT_PHDR, PT_TLS };
use goblin::elf::section_header::{ SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS };

use super::config::{ Config, Machine };
use super::link::Out;
use super::order::{ is_relro, OrderContext };
use super::outsec::{ OutSecId, OutSection };
use super::script::Script;

/* AMD HSA loaders place segments by these custom types; regular ELF
   constants don't name them */
pub const PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM: u32 = 0x6000_0001;
pub const PT_AMDGPU_HSA_LOAD_CODE_AGENT: u32 = 0x6000_0004;
pub const SHF_AMDGPU_HSA_GLOBAL: u64 = 0x10_0000;
pub const SHF_AMDGPU_HSA_CODE: u64 = 0x40_0000;
pub const SHF_AMDGPU_HSA_AGENT: u64 = 0x80_0000;

/* one program header plus the range of output sections it spans. the
   derived placement fields stay zero until addresses are assigned */
pub struct Phdr
{
    pub p_type: u32,
    pub flags: u32,
    pub first: Option<OutSecId>,
    pub last: Option<OutSecId>,

    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64
}

impl Phdr
{
    fn new(p_type: u32, flags: u32) -> Phdr
    {
        Phdr
        {
            p_type, flags,
            first: None,
            last: None,
            offset: 0,
            vaddr: 0,
            filesz: 0,
            memsz: 0,
            align: 0
        }
    }

    fn add_section(&mut self, id: OutSecId, sec: &OutSection)
    {
        self.last = Some(id);
        if self.first.is_none()
        {
            self.first = Some(id);
        }
        if sec.align > self.align
        {
            self.align = sec.align;
        }
    }
}

/* does this section take up address space in a PT_LOAD? TLS NOBITS does
   not: PT_TLS accounts for it in thread-local space instead */
pub fn needs_pt_load(sec: &OutSection) -> bool
{
    if sec.is_alloc() == false
    {
        return false;
    }
    if sec.is_tls() && sec.sh_type == SHT_NOBITS
    {
        return false;
    }
    true
}

pub fn to_phdr_flags(sh_flags: u64) -> u32
{
    let mut flags = PF_R;
    if sh_flags & (SHF_WRITE as u64) != 0
    {
        flags = flags | PF_W;
    }
    if sh_flags & (SHF_EXECINSTR as u64) != 0
    {
        flags = flags | PF_X;
    }
    flags
}

/* AMDGPU splits loads by address-space flag bits instead of permissions */
fn amdgpu_phdr_type(sec: &OutSection) -> u32
{
    if sec.flags & SHF_AMDGPU_HSA_CODE != 0
    {
        return PT_AMDGPU_HSA_LOAD_CODE_AGENT;
    }
    if sec.flags & SHF_AMDGPU_HSA_GLOBAL != 0 && sec.flags & SHF_AMDGPU_HSA_AGENT == 0
    {
        return PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM;
    }
    PT_LOAD
}

/* decide which program headers exist and which sections each one covers */
pub fn create_phdrs(config: &Config, script: &Script, out: &Out,
                    output_is_dynamic: bool) -> Vec<Phdr>
{
    let ctx = OrderContext
    {
        config,
        script,
        sections: &out.sections,
        got: out.got,
        gotplt: out.gotplt,
        dynamic: out.dynamic
    };

    let mut phdrs: Vec<Phdr> = Vec::new();

    /* PT_PHDR describes the program-header table itself */
    let mut phdr_hdr = Phdr::new(PT_PHDR, PF_R);
    if let Some(ph) = out.program_headers
    {
        phdr_hdr.add_section(ph, out.section(ph));
    }
    phdrs.push(phdr_hdr);

    /* PT_INTERP must come second when a dynamic linker is requested */
    if let Some(interp) = out.interp
    {
        let mut hdr = Phdr::new(PT_INTERP, to_phdr_flags(out.section(interp).flags));
        hdr.add_section(interp, out.section(interp));
        phdrs.push(hdr);
    }

    /* the first PT_LOAD is read-only and anchored at the ELF header so
       the loader maps the file's front matter */
    let mut flags = PF_R;
    let mut load_idx;
    {
        let mut load = Phdr::new(PT_LOAD, flags);
        load.add_section(out.elf_header, out.section(out.elf_header));
        load_idx = phdrs.len();
        phdrs.push(load);
    }

    let mut tls_hdr = Phdr::new(PT_TLS, PF_R);
    let mut relro_hdr = Phdr::new(PT_GNU_RELRO, PF_R);

    for id in &out.order
    {
        let sec = out.section(*id);
        if sec.is_alloc() == false
        {
            break;
        }

        /* gather every TLS section under PT_TLS for address assignment */
        if sec.is_tls()
        {
            tls_hdr.add_section(*id, sec);
        }

        if needs_pt_load(sec) == false
        {
            continue;
        }

        /* a permission change starts a fresh load segment */
        let new_flags = to_phdr_flags(sec.flags);
        if flags != new_flags
        {
            let load_type = if config.machine == Machine::Amdgpu
            {
                amdgpu_phdr_type(sec)
            }
            else
            {
                PT_LOAD
            };
            phdrs.push(Phdr::new(load_type, new_flags));
            load_idx = phdrs.len() - 1;
            flags = new_flags;
        }

        phdrs[load_idx].add_section(*id, sec);

        if is_relro(&ctx, *id)
        {
            relro_hdr.add_section(*id, sec);
        }
    }

    if tls_hdr.first.is_some()
    {
        phdrs.push(tls_hdr);
    }

    if output_is_dynamic
    {
        if let Some(dynamic) = out.dynamic
        {
            let mut hdr = Phdr::new(PT_DYNAMIC, to_phdr_flags(out.section(dynamic).flags));
            hdr.add_section(dynamic, out.section(dynamic));
            phdrs.push(hdr);
        }
    }

    if relro_hdr.first.is_some()
    {
        phdrs.push(relro_hdr);
    }

    if let Some(eh) = out.eh_frame_hdr
    {
        if out.in_order(eh)
        {
            let mut hdr = Phdr::new(PT_GNU_EH_FRAME, to_phdr_flags(out.section(eh).flags));
            hdr.add_section(eh, out.section(eh));
            phdrs.push(hdr);
        }
    }

    /* ask the loader for a non-executable stack unless told otherwise */
    if config.z_execstack == false
    {
        phdrs.push(Phdr::new(PT_GNU_STACK, PF_R | PF_W));
    }

    phdrs
}
