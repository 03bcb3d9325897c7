/* Hand out .bss space to common symbols and copy relocations
 *
 * common symbols have no home section until now; shared-library data
 * symbols that won a copy relocation need a slot the dynamic linker can
 * copy the original bytes into. both pack onto the end of .bss, which is
 * created on demand the moment the first of either appears
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use super::layout::align_up_to;
use super::link::Out;
use super::symbol::{ SymbolBody, SymbolTable, SymId };

/* pack common symbols onto .bss, largest alignment first so padding
   stays small. ties keep their discovery order: the sort must be stable */
pub fn add_common_symbols(symtab: &mut SymbolTable, out: &mut Out, mut syms: Vec<SymId>)
{
    if syms.is_empty()
    {
        return;
    }

    syms.sort_by(|a, b|
    {
        let align_of = |id: &SymId| match symtab.get(*id).body
        {
            SymbolBody::DefinedCommon { max_align, .. } => max_align,
            _ => 1
        };
        align_of(b).cmp(&align_of(a))
    });

    let bss = out.ensure_bss();
    let mut off = out.section(bss).size;
    let mut max_seen = 1;

    for id in syms
    {
        if let SymbolBody::DefinedCommon { size, max_align, ref mut offset_in_bss } =
            symtab.get_mut(id).body
        {
            let align = max_align.max(1);
            off = align_up_to(off, align);
            *offset_in_bss = off;
            off = off + size;
            if align > max_seen
            {
                max_seen = align;
            }
        }
    }

    let sec = out.section_mut(bss);
    sec.size = off;
    sec.update_align(max_seen);
}

/* reserve slots for copy relocations. each slot's alignment is the
   largest power of two dividing both the source section's alignment and
   the symbol's offset within it, which preserves whatever alignment the
   original definition actually had */
pub fn add_copy_rel_symbols(symtab: &mut SymbolTable, out: &mut Out, syms: Vec<SymId>)
{
    if syms.is_empty()
    {
        return;
    }

    let bss = out.ensure_bss();
    let mut off = out.section(bss).size;
    let mut max_seen = out.section(bss).align;

    for id in syms
    {
        if let SymbolBody::Shared { value, size, sec_align, ref mut offset_in_bss, .. } =
            symtab.get_mut(id).body
        {
            let zeros = sec_align.max(1).trailing_zeros().min(
                        if value == 0 { 63 } else { value.trailing_zeros() });
            let align = 1u64 << zeros;

            off = align_up_to(off, align);
            *offset_in_bss = off;
            off = off + size;
            if align > max_seen
            {
                max_seen = align;
            }
        }
    }

    let sec = out.section_mut(bss);
    sec.size = off;
    sec.update_align(max_seen);
}
