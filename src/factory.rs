/* Map input sections onto canonical output sections
 *
 * the factory hands out one output section per distinct key of name, type,
 * flags and merge alignment, creating the right concrete kind on first
 * sight. creation order is preserved: it decides tie-breaks later when the
 * final sort runs, so the map must iterate in insertion order
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use indexmap::IndexMap;
use std::collections::HashMap;

use goblin::elf::header::EM_X86_64;
use goblin::elf::section_header::{ SHF_GROUP, SHT_PROGBITS };

use super::config::Config;
use super::input::{ InputSection, SectionKind };
use super::link::Out;
use super::outsec::{ EhFrameBody, MergeBody, OutSecId, OutSection, SecBody };
use super::script::Script;

/* GNU as emits .eh_frame as SHT_PROGBITS or this; canonicalize to this */
pub const SHT_X86_64_UNWIND: u32 = 0x7000_0001;

/* input names with these prefixes collapse onto the prefix's section */
const NAME_PREFIXES: [&str; 12] =
[
    ".text.", ".rodata.", ".data.rel.ro.", ".data.", ".bss.",
    ".init_array.", ".fini_array.", ".ctors.", ".dtors.",
    ".tbss.", ".gcc_except_table.", ".tdata."
];

/* choose the output section name for an input section: a linker-script
   assignment wins, then prefix truncation, then the input's own name */
pub fn output_section_name(script: &Script, input_name: &str) -> String
{
    if let Some(assigned) = script.output_section(input_name)
    {
        return String::from(assigned);
    }

    for prefix in NAME_PREFIXES.iter()
    {
        if input_name.starts_with(prefix)
        {
            /* keep the prefix minus its trailing dot */
            return String::from(&prefix[..prefix.len() - 1]);
        }
    }

    String::from(input_name)
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct SectionKey
{
    name: String,
    sh_type: u32,
    flags: u64,
    alignment: u64
}

pub struct OutputSectionFactory
{
    map: IndexMap<SectionKey, OutSecId>
}

impl OutputSectionFactory
{
    pub fn new() -> OutputSectionFactory
    {
        OutputSectionFactory { map: IndexMap::new() }
    }

    fn key_for(&self, config: &Config, insec: &InputSection, outsec_name: &str) -> SectionKey
    {
        /* the group flag describes input-side comdat plumbing, not output */
        let flags = insec.header.sh_flags & !(SHF_GROUP as u64);

        /* merge outputs are monomorphic in entry size: keying on the
           larger of alignment and entry size splits incompatible inputs */
        let alignment = match insec.kind
        {
            SectionKind::Merge => insec.header.sh_addralign.max(insec.header.sh_entsize),
            _ => 0
        };

        let mut sh_type = insec.header.sh_type;
        if sh_type == SHT_PROGBITS && config.e_machine() == EM_X86_64 && insec.kind == SectionKind::EhFrame
        {
            sh_type = SHT_X86_64_UNWIND;
        }

        SectionKey { name: String::from(outsec_name), sh_type, flags, alignment }
    }

    /* get or create the output section for an input section.
       <= the section's id plus whether this call created it */
    pub fn create(&mut self, out: &mut Out, config: &Config, insec: &InputSection,
                  outsec_name: &str) -> (OutSecId, bool)
    {
        let key = self.key_for(config, insec, outsec_name);
        if let Some(id) = self.map.get(&key)
        {
            return (*id, false);
        }

        let body = match insec.kind
        {
            SectionKind::Regular => SecBody::Regular { members: Vec::new() },
            SectionKind::Merge => SecBody::Merge(MergeBody
            {
                members: Vec::new(),
                entsize: insec.header.sh_entsize,
                pieces: IndexMap::new(),
                map: HashMap::new()
            }),
            SectionKind::EhFrame => SecBody::EhFrame(EhFrameBody
            {
                members: Vec::new(),
                cies: IndexMap::new(),
                fdes: Vec::new()
            }),
            SectionKind::MipsReginfo => SecBody::MipsReginfo
            {
                members: Vec::new(),
                gprmask: 0,
                gp_value: 0
            }
        };

        let mut sec = OutSection::new(&key.name, key.sh_type, key.flags, body);
        sec.entsize = match insec.kind
        {
            SectionKind::Merge => insec.header.sh_entsize,
            _ => 0
        };
        let id = out.push_section(sec);
        self.map.insert(key, id);
        (id, true)
    }

    /* find an output section by its identity, ignoring merge alignment.
       used to discover optional sections like .bss and .init_array */
    pub fn lookup(&self, name: &str, sh_type: u32, flags: u64) -> Option<OutSecId>
    {
        let key = SectionKey { name: String::from(name), sh_type, flags, alignment: 0 };
        self.map.get(&key).copied()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use goblin::elf::section_header::{ SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHF_MERGE, SHF_STRINGS };
    use crate::config::default_config;
    use crate::link::Out;

    fn input(name: &str, sh_type: u32, flags: u64, addralign: u64, entsize: u64, kind: SectionKind) -> InputSection
    {
        let mut header = SectionHeader::default();
        header.sh_type = sh_type;
        header.sh_flags = flags;
        header.sh_addralign = addralign;
        header.sh_entsize = entsize;
        InputSection::new(name, header, Vec::new(), kind)
    }

    #[test]
    fn names_truncate_at_known_prefixes()
    {
        let script = Script::new();
        assert_eq!(output_section_name(&script, ".text.hot.main"), ".text");
        assert_eq!(output_section_name(&script, ".data.rel.ro.local"), ".data.rel.ro");
        assert_eq!(output_section_name(&script, ".tbss.x"), ".tbss");
        assert_eq!(output_section_name(&script, ".mysection"), ".mysection");
    }

    #[test]
    fn script_assignment_beats_truncation()
    {
        let mut script = Script::new();
        script.add_rule(".code", vec![String::from(".text*")]);
        assert_eq!(output_section_name(&script, ".text.startup"), ".code");
    }

    #[test]
    fn equal_keys_share_one_section()
    {
        let config = default_config();
        let mut out = Out::new();
        let mut factory = OutputSectionFactory::new();

        let flags = (SHF_ALLOC | SHF_EXECINSTR) as u64;
        let a = input(".text.a", SHT_PROGBITS, flags, 16, 0, SectionKind::Regular);
        let b = input(".text.b", SHT_PROGBITS, flags, 4, 0, SectionKind::Regular);

        let (sec_a, new_a) = factory.create(&mut out, &config, &a, ".text");
        let (sec_b, new_b) = factory.create(&mut out, &config, &b, ".text");
        assert_eq!(new_a, true);
        assert_eq!(new_b, false);
        assert_eq!(sec_a, sec_b);
    }

    #[test]
    fn merge_alignment_splits_outputs()
    {
        let config = default_config();
        let mut out = Out::new();
        let mut factory = OutputSectionFactory::new();

        let flags = (SHF_ALLOC | SHF_MERGE | SHF_STRINGS) as u64;
        let narrow = input(".rodata.str1.1", SHT_PROGBITS, flags, 1, 1, SectionKind::Merge);
        let wide = input(".rodata.str2.8", SHT_PROGBITS, flags, 8, 2, SectionKind::Merge);

        let (sec_a, _) = factory.create(&mut out, &config, &narrow, ".rodata");
        let (sec_b, _) = factory.create(&mut out, &config, &wide, ".rodata");
        assert!(sec_a != sec_b);
    }

    #[test]
    fn group_flag_is_ignored_in_the_key()
    {
        let config = default_config();
        let mut out = Out::new();
        let mut factory = OutputSectionFactory::new();

        let plain = input(".text.a", SHT_PROGBITS, SHF_ALLOC as u64, 1, 0, SectionKind::Regular);
        let grouped = input(".text.b", SHT_PROGBITS, (SHF_ALLOC | SHF_GROUP) as u64, 1, 0, SectionKind::Regular);

        let (sec_a, _) = factory.create(&mut out, &config, &plain, ".text");
        let (sec_b, is_new) = factory.create(&mut out, &config, &grouped, ".text");
        assert_eq!(sec_a, sec_b);
        assert_eq!(is_new, false);
    }

    #[test]
    fn eh_frame_type_is_canonicalized_on_x86_64()
    {
        let config = default_config();
        let mut out = Out::new();
        let mut factory = OutputSectionFactory::new();

        let eh = input(".eh_frame", SHT_PROGBITS, SHF_ALLOC as u64, 8, 0, SectionKind::EhFrame);
        let (id, _) = factory.create(&mut out, &config, &eh, ".eh_frame");
        assert_eq!(out.section(id).sh_type, SHT_X86_64_UNWIND);
    }

    #[test]
    fn lookup_finds_by_identity()
    {
        let config = default_config();
        let mut out = Out::new();
        let mut factory = OutputSectionFactory::new();

        let flags = SHF_ALLOC as u64;
        let text = input(".text", SHT_PROGBITS, flags, 4, 0, SectionKind::Regular);
        let (id, _) = factory.create(&mut out, &config, &text, ".text");

        assert_eq!(factory.lookup(".text", SHT_PROGBITS, flags), Some(id));
        assert_eq!(factory.lookup(".data", SHT_PROGBITS, flags), None);
    }
}
