/* Output sections and their concrete kinds
 *
 * one struct carries the fields every output section has (name, type,
 * flags, final size and placement); the body enum carries what makes each
 * kind different. regular sections concatenate their inputs, merge
 * sections deduplicate fixed-size or string entries, eh_frame sections
 * deduplicate CIEs. the writer-owned singleton kinds live in synth.rs
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashMap;
use indexmap::IndexMap;

use goblin::elf::section_header::{ SHF_ALLOC, SHF_STRINGS, SHF_TLS, SHT_NOBITS };

use super::input::{ ObjectFile, SecRef };
use super::layout::align_up_to;
use super::synth::{ DynamicSection, GnuHashData, GotPltSection, GotSection, PltSection,
                    RelocSection, StringTable, SymTabSection, SysvHashData };

/* index of an output section in the writer's owning pool */
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutSecId(pub usize);

/* deduplicated SHF_MERGE content */
pub struct MergeBody
{
    pub members: Vec<SecRef>,
    pub entsize: u64,

    /* piece bytes -> offset in the output section, in first-seen order */
    pub pieces: IndexMap<Vec<u8>, u64>,

    /* per input section: (input offset, output offset, length) per piece,
       so symbols and relocations inside merged data can be translated */
    pub map: HashMap<SecRef, Vec<(u64, u64, u64)>>
}

/* one frame-description record kept from the input .eh_frame sections */
pub struct Fde
{
    pub data: Vec<u8>,
    pub cie_off: u64,       /* output offset of the owning CIE */
    pub out_off: u64        /* output offset of this FDE, set at finalize */
}

/* .eh_frame with common-information entries deduplicated */
pub struct EhFrameBody
{
    pub members: Vec<SecRef>,
    pub cies: IndexMap<Vec<u8>, u64>,
    pub fdes: Vec<Fde>
}

/* what kind of output section this is, with kind-specific state */
pub enum SecBody
{
    /* the space reserved at file offset zero for the ELF header and the
       program-header table. they own no content of their own */
    Dummy,

    Regular { members: Vec<SecRef> },
    Merge(MergeBody),
    EhFrame(EhFrameBody),

    /* writer-owned singletons */
    Interp,
    Got(GotSection),
    GotPlt(GotPltSection),
    Plt(PltSection),
    RelaDyn(RelocSection),
    RelaPlt(RelocSection),
    Dynamic(DynamicSection),
    DynSym(SymTabSection),
    SymTab(SymTabSection),
    StrTab(StringTable),
    Hash(SysvHashData),
    GnuHash(GnuHashData),
    EhFrameHdr,
    MipsRldMap,
    MipsReginfo { members: Vec<SecRef>, gprmask: u32, gp_value: u64 }
}

pub struct OutSection
{
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub align: u64,
    pub entsize: u64,
    pub size: u64,

    /* placement, assigned by the layout engine */
    pub va: u64,
    pub file_off: u64,

    /* position in the section-header table, zero until assigned */
    pub section_index: u32,

    /* offset of this section's name in .shstrtab */
    pub sh_name: u32,

    /* sh_link/sh_info, filled late once section indices are known */
    pub link: u32,
    pub info: u32,

    pub body: SecBody
}

impl OutSection
{
    pub fn new(name: &str, sh_type: u32, flags: u64, body: SecBody) -> OutSection
    {
        OutSection
        {
            name: String::from(name),
            sh_type,
            flags,
            align: 1,
            entsize: 0,
            size: 0,
            va: 0,
            file_off: 0,
            section_index: 0,
            sh_name: 0,
            link: 0,
            info: 0,
            body
        }
    }

    pub fn is_alloc(&self) -> bool { self.flags & (SHF_ALLOC as u64) != 0 }
    pub fn is_tls(&self) -> bool { self.flags & (SHF_TLS as u64) != 0 }
    pub fn is_nobits(&self) -> bool { self.sh_type == SHT_NOBITS }

    /* bytes this section occupies in the file, as opposed to in memory */
    pub fn size_on_disk(&self) -> u64 { if self.is_nobits() { 0 } else { self.size } }

    pub fn update_align(&mut self, align: u64)
    {
        if align > self.align
        {
            self.align = align;
        }
    }

    /* register an incoming input section with this output section */
    pub fn add_section(&mut self, sec: SecRef, align: u64)
    {
        self.update_align(align);
        match &mut self.body
        {
            SecBody::Regular { members } => members.push(sec),
            SecBody::Merge(merge) => merge.members.push(sec),
            SecBody::EhFrame(eh) => eh.members.push(sec),
            SecBody::MipsReginfo { members, .. } => members.push(sec),
            _ => fatal_msg!("Can't add input section to output section {}", self.name)
        }
    }

    /* translate an offset within a merged input section to its place in
       the output. non-merge sections pass the offset straight through */
    pub fn merge_offset(&self, sec: SecRef, offset: u64) -> u64
    {
        match &self.body
        {
            SecBody::Merge(merge) =>
            {
                if let Some(pieces) = merge.map.get(&sec)
                {
                    for (in_off, out_off, len) in pieces
                    {
                        if offset >= *in_off && offset < *in_off + *len
                        {
                            return *out_off + (offset - *in_off);
                        }
                    }
                }
                0
            },
            _ => offset
        }
    }
}

/* lay out a regular output section: place each live member at the next
   offset its alignment allows and grow the output to cover it */
pub fn finalize_regular(sec: &mut OutSection, objects: &mut [ObjectFile])
{
    let members = match &sec.body
    {
        SecBody::Regular { members } => members.clone(),
        _ => return
    };

    let mut off = sec.size;
    for secref in members
    {
        let insec = &mut objects[secref.file as usize].sections[secref.sec as usize];
        if insec.live == false
        {
            continue;
        }

        let align = insec.header.sh_addralign.max(1);
        off = align_up_to(off, align);
        insec.out_off = off;
        off = off + insec.header.sh_size;
    }
    sec.size = off;
}

/* deduplicate merge-section entries. strings split at NUL terminators,
   everything else splits at the fixed entry size */
pub fn finalize_merge(sec: &mut OutSection, objects: &[ObjectFile])
{
    let is_strings = sec.flags & (SHF_STRINGS as u64) != 0;
    let merge = match &mut sec.body
    {
        SecBody::Merge(merge) => merge,
        _ => return
    };

    let mut size = 0u64;
    for secref in merge.members.clone()
    {
        let insec = &objects[secref.file as usize].sections[secref.sec as usize];
        if insec.live == false
        {
            continue;
        }

        let mut placed = Vec::new();
        let mut in_off = 0u64;
        while (in_off as usize) < insec.data.len()
        {
            let piece: &[u8] = if is_strings
            {
                let rest = &insec.data[in_off as usize..];
                match rest.iter().position(|b| *b == 0)
                {
                    Some(nul) => &rest[..nul + 1],
                    None => rest
                }
            }
            else
            {
                /* a zero entry size means the whole section is one constant */
                let remaining = insec.data.len() - in_off as usize;
                let len = if merge.entsize == 0 { remaining } else { (merge.entsize as usize).min(remaining) };
                &insec.data[in_off as usize..in_off as usize + len]
            };

            let out_off = match merge.pieces.get(piece).copied()
            {
                Some(existing) => existing,
                None =>
                {
                    let at = size;
                    merge.pieces.insert(Vec::from(piece), at);
                    size = size + piece.len() as u64;
                    at
                }
            };
            placed.push((in_off, out_off, piece.len() as u64));
            in_off = in_off + piece.len() as u64;
        }
        merge.map.insert(secref, placed);
    }
    sec.size = size;
}

/* fold .eh_frame inputs: keep one copy of each CIE, keep every FDE and
   remember which deduplicated CIE it belongs to. records are 4-byte
   length-prefixed; a zero length terminates a section's records */
pub fn finalize_ehframe(sec: &mut OutSection, objects: &[ObjectFile], big_endian: bool)
{
    let eh = match &mut sec.body
    {
        SecBody::EhFrame(eh) => eh,
        _ => return
    };

    let read_u32 = |bytes: &[u8]| -> u32
    {
        let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if big_endian { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) }
    };

    let mut size = 0u64;
    for secref in eh.members.clone()
    {
        let insec = &objects[secref.file as usize].sections[secref.sec as usize];
        if insec.live == false
        {
            continue;
        }

        /* maps this input's record offsets to output CIE offsets so FDE
           cie pointers can be rewritten */
        let mut local_cies: HashMap<u64, u64> = HashMap::new();

        let mut pos = 0usize;
        while pos + 4 <= insec.data.len()
        {
            let len = read_u32(&insec.data[pos..]) as usize;
            if len == 0
            {
                break;
            }
            let record = &insec.data[pos..pos + 4 + len];
            let id = read_u32(&record[4..]);

            if id == 0
            {
                /* a CIE: dedup on its exact bytes */
                let out_off = match eh.cies.get(record).copied()
                {
                    Some(existing) => existing,
                    None =>
                    {
                        let at = size;
                        eh.cies.insert(Vec::from(record), at);
                        size = size + record.len() as u64;
                        at
                    }
                };
                local_cies.insert(pos as u64, out_off);
            }
            else
            {
                /* an FDE: the id field is the distance back to its CIE */
                let cie_pos = (pos as u64 + 4).wrapping_sub(id as u64);
                let cie_off = match local_cies.get(&cie_pos)
                {
                    Some(off) => *off,
                    None => 0
                };
                eh.fdes.push(Fde { data: Vec::from(record), cie_off, out_off: 0 });
            }
            pos = pos + 4 + len;
        }
    }

    /* FDEs go after the CIEs, in input order */
    for fde in &mut eh.fdes
    {
        fde.out_off = size;
        size = size + fde.data.len() as u64;
    }
    sec.size = size;
}

/* fold the register-usage masks of the inputs' .reginfo records into one.
   the gp value is filled after layout, when _gp exists */
pub fn finalize_reginfo(sec: &mut OutSection, objects: &[ObjectFile], big_endian: bool)
{
    let (members, gprmask) = match &mut sec.body
    {
        SecBody::MipsReginfo { members, gprmask, .. } => (members.clone(), gprmask),
        _ => return
    };

    for secref in members
    {
        let insec = &objects[secref.file as usize].sections[secref.sec as usize];
        if insec.live == false || insec.data.len() < 4
        {
            continue;
        }
        let arr = [insec.data[0], insec.data[1], insec.data[2], insec.data[3]];
        let mask = if big_endian { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) };
        *gprmask = *gprmask | mask;
    }

    /* one Elf32_RegInfo record: gprmask, four cprmasks, gp value */
    sec.size = 24;
}

#[cfg(test)]
mod tests
{
    use super::*;
    use goblin::elf::section_header::{ SectionHeader, SHT_PROGBITS };
    use crate::input::{ InputSection, SectionKind };

    fn test_object(sections: Vec<InputSection>) -> ObjectFile
    {
        let mut file = ObjectFile::new("test.o");
        file.sections = sections;
        file
    }

    fn progbits(name: &str, data: Vec<u8>, addralign: u64, entsize: u64, kind: SectionKind) -> InputSection
    {
        let mut header = SectionHeader::default();
        header.sh_type = SHT_PROGBITS;
        header.sh_size = data.len() as u64;
        header.sh_addralign = addralign;
        header.sh_entsize = entsize;
        InputSection::new(name, header, data, kind)
    }

    #[test]
    fn regular_members_pack_with_alignment()
    {
        let mut objects = vec!(test_object(vec!
        [
            progbits(".text", vec![0; 3], 1, 0, SectionKind::Regular),
            progbits(".text", vec![0; 8], 16, 0, SectionKind::Regular)
        ]));

        let mut sec = OutSection::new(".text", SHT_PROGBITS, SHF_ALLOC as u64, SecBody::Regular { members: Vec::new() });
        sec.add_section(SecRef { file: 0, sec: 0 }, 1);
        sec.add_section(SecRef { file: 0, sec: 1 }, 16);
        finalize_regular(&mut sec, &mut objects);

        assert_eq!(objects[0].sections[0].out_off, 0);
        assert_eq!(objects[0].sections[1].out_off, 16);
        assert_eq!(sec.size, 24);
        assert_eq!(sec.align, 16);
    }

    #[test]
    fn dead_members_take_no_space()
    {
        let mut live = progbits(".text", vec![0; 4], 4, 0, SectionKind::Regular);
        live.live = true;
        let mut dead = progbits(".text", vec![0; 100], 4, 0, SectionKind::Regular);
        dead.live = false;
        let mut objects = vec!(test_object(vec![live, dead]));

        let mut sec = OutSection::new(".text", SHT_PROGBITS, SHF_ALLOC as u64, SecBody::Regular { members: Vec::new() });
        sec.add_section(SecRef { file: 0, sec: 0 }, 4);
        sec.add_section(SecRef { file: 0, sec: 1 }, 4);
        finalize_regular(&mut sec, &mut objects);
        assert_eq!(sec.size, 4);
    }

    #[test]
    fn merge_strings_deduplicate()
    {
        let data = b"hi\0world\0hi\0".to_vec();
        let objects = vec!(test_object(vec!
        [
            progbits(".rodata.str1.1", data, 1, 1, SectionKind::Merge)
        ]));

        let body = SecBody::Merge(MergeBody
        {
            members: Vec::new(),
            entsize: 1,
            pieces: IndexMap::new(),
            map: HashMap::new()
        });
        let mut sec = OutSection::new(".rodata", SHT_PROGBITS, (SHF_ALLOC | SHF_STRINGS) as u64, body);
        sec.add_section(SecRef { file: 0, sec: 0 }, 1);
        finalize_merge(&mut sec, &objects);

        /* "hi\0" stored once, "world\0" once */
        assert_eq!(sec.size, 9);

        /* the second "hi" at input offset 9 maps back to output offset 0 */
        assert_eq!(sec.merge_offset(SecRef { file: 0, sec: 0 }, 9), 0);
        assert_eq!(sec.merge_offset(SecRef { file: 0, sec: 0 }, 3), 3);
    }

    #[test]
    fn ehframe_cies_deduplicate()
    {
        /* two inputs with byte-identical CIEs and one FDE each */
        let mut cie = vec![0x0c, 0, 0, 0]; /* length 12 */
        cie.extend_from_slice(&[0, 0, 0, 0]); /* id 0 = CIE */
        cie.extend_from_slice(&[1, b'z', b'R', 0, 1, 0x78, 0x10]);
        cie.push(0);
        assert_eq!(cie.len(), 16);

        let mut fde = vec![0x0c, 0, 0, 0];
        fde.extend_from_slice(&[0x14, 0, 0, 0]); /* points back 0x14 to the CIE */
        fde.extend_from_slice(&[0; 8]);

        let mut data = Vec::new();
        data.extend_from_slice(&cie);
        data.extend_from_slice(&fde);

        let objects = vec!(test_object(vec!
        [
            progbits(".eh_frame", data.clone(), 8, 0, SectionKind::EhFrame),
            progbits(".eh_frame", data, 8, 0, SectionKind::EhFrame)
        ]));

        let body = SecBody::EhFrame(EhFrameBody { members: Vec::new(), cies: IndexMap::new(), fdes: Vec::new() });
        let mut sec = OutSection::new(".eh_frame", SHT_PROGBITS, SHF_ALLOC as u64, body);
        sec.add_section(SecRef { file: 0, sec: 0 }, 8);
        sec.add_section(SecRef { file: 0, sec: 1 }, 8);
        finalize_ehframe(&mut sec, &objects, false);

        /* one 16-byte CIE plus two 16-byte FDEs */
        assert_eq!(sec.size, 48);
        if let SecBody::EhFrame(eh) = &sec.body
        {
            assert_eq!(eh.cies.len(), 1);
            assert_eq!(eh.fdes.len(), 2);
            assert_eq!(eh.fdes[0].cie_off, 0);
        }
        else
        {
            panic!("wrong body kind");
        }
    }
}
