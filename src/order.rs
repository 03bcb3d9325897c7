/* Decide the order output sections appear in
 *
 * the comparator below is used with a stable sort, so sections that
 * compare equal keep their creation order. the cascade matters: each
 * discriminator only runs when every earlier one tied
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::cmp::Ordering;

use goblin::elf::header::EM_PPC64;
use goblin::elf::section_header::{ SHF_ALLOC, SHF_EXECINSTR, SHF_TLS, SHF_WRITE,
                                   SHT_FINI_ARRAY, SHT_INIT_ARRAY, SHT_NOBITS,
                                   SHT_PREINIT_ARRAY };

use super::config::Config;
use super::outsec::{ OutSecId, OutSection };
use super::script::Script;

/* everything the comparator needs to see, borrowed for the sort's duration */
pub struct OrderContext<'a>
{
    pub config: &'a Config,
    pub script: &'a Script,
    pub sections: &'a [OutSection],
    pub got: Option<OutSecId>,
    pub gotplt: Option<OutSecId>,
    pub dynamic: Option<OutSecId>
}

/* will the dynamic linker remap this section read-only once relocation
   is done? decides PT_GNU_RELRO membership and sort placement */
pub fn is_relro(ctx: &OrderContext, id: OutSecId) -> bool
{
    if ctx.config.z_relro == false
    {
        return false;
    }

    let sec = &ctx.sections[id.0];
    if sec.is_alloc() == false || sec.flags & (SHF_WRITE as u64) == 0
    {
        return false;
    }
    if sec.is_tls()
    {
        return true;
    }
    if sec.sh_type == SHT_INIT_ARRAY || sec.sh_type == SHT_FINI_ARRAY || sec.sh_type == SHT_PREINIT_ARRAY
    {
        return true;
    }
    if Some(id) == ctx.gotplt
    {
        /* .got.plt is only safe to seal when every slot binds at startup */
        return ctx.config.z_now;
    }
    if Some(id) == ctx.dynamic || Some(id) == ctx.got
    {
        return true;
    }
    matches!(sec.name.as_str(), ".data.rel.ro" | ".ctors" | ".dtors" | ".jcr" | ".eh_frame")
}

/* PPC64 wants the TOC-adjacent sections in a fixed order so a signed
   16-bit offset from the TOC base covers as much of them as possible.
   .tocbss leads the NOBITS run to stay within reach too */
fn ppc64_section_rank(name: &str) -> i32
{
    match name
    {
        ".tocbss" => 0,
        ".branch_lt" => 2,
        ".toc" => 3,
        ".toc1" => 4,
        ".opd" => 5,
        _ => 1
    }
}

pub fn compare_sections(ctx: &OrderContext, a_id: OutSecId, b_id: OutSecId) -> Ordering
{
    let a = &ctx.sections[a_id.0];
    let b = &ctx.sections[b_id.0];

    /* the script's declared order overrides everything */
    let script_order = ctx.script.compare_sections(&a.name, &b.name);
    if script_order != 0
    {
        return if script_order < 0 { Ordering::Less } else { Ordering::Greater };
    }

    /* allocatable sections first: keeps PT_LOADs small and keeps debug
       info from perturbing code addresses */
    let a_alloc = a.is_alloc();
    let b_alloc = b.is_alloc();
    if a_alloc != b_alloc
    {
        return if a_alloc { Ordering::Less } else { Ordering::Greater };
    }
    if a_alloc == false
    {
        return Ordering::Equal;
    }

    /* read-only before writable so the first PT_LOAD can cover the ELF
       header and program headers */
    let a_writable = a.flags & (SHF_WRITE as u64) != 0;
    let b_writable = b.flags & (SHF_WRITE as u64) != 0;
    if a_writable != b_writable
    {
        return if b_writable { Ordering::Less } else { Ordering::Greater };
    }

    /* and non-executable before executable for the same reason */
    let a_exec = a.flags & (SHF_EXECINSTR as u64) != 0;
    let b_exec = b.flags & (SHF_EXECINSTR as u64) != 0;
    if a_exec != b_exec
    {
        return if b_exec { Ordering::Less } else { Ordering::Greater };
    }

    /* the TLS initialization image must be one contiguous block, directly
       before the other R/W sections. TLS NOBITS sits here too: it takes
       no address space in the PT_LOAD */
    let a_tls = a.is_tls();
    let b_tls = b.is_tls();
    if a_tls != b_tls
    {
        return if a_tls { Ordering::Less } else { Ordering::Greater };
    }

    /* NOBITS last, so memsz > filesz describes exactly the zeroed tail */
    let a_nobits = a.sh_type == SHT_NOBITS;
    let b_nobits = b.sh_type == SHT_NOBITS;
    if a_nobits != b_nobits
    {
        return if b_nobits { Ordering::Less } else { Ordering::Greater };
    }

    /* RELRO pages cluster before plain R/W so one segment covers them */
    let a_relro = is_relro(ctx, a_id);
    let b_relro = is_relro(ctx, b_id);
    if a_relro != b_relro
    {
        return if a_relro { Ordering::Less } else { Ordering::Greater };
    }

    if ctx.config.e_machine() == EM_PPC64
    {
        return ppc64_section_rank(&a.name).cmp(&ppc64_section_rank(&b.name));
    }

    Ordering::Equal
}
