/* Symbols the linker is expected to conjure up
 *
 * programs lean on a family of reserved names: _end and friends for the
 * heap start, __start_X/__stop_X for iterating named sections, the
 * init/fini array brackets, and __rela_iplt_* so static startup code can
 * run ifunc resolvers. they are installed here with placeholder values;
 * the layout engine writes the real numbers once addresses exist
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use super::config::Config;
use super::link::Out;
use super::outsec::OutSecId;
use super::symbol::SymbolTable;

/* install an absolute placeholder for a reserved name if anything refers
   to it. the alias is only installed while it's still undefined: programs
   are free to define "end" as an ordinary symbol of their own */
fn define_reserved(symtab: &mut SymbolTable, name: &str, alias: &str)
{
    if symtab.find(name).is_some()
    {
        symtab.add_absolute(name, 0);
    }
    if let Some(id) = symtab.find(alias)
    {
        if symtab.get(symtab.repl(id)).is_undefined()
        {
            symtab.add_absolute(alias, 0);
        }
    }
}

/* run before section creation. the _end/_etext/_edata family gets
   placeholders; __tls_get_addr gets a hidden no-op definition for static
   links, where the relaxed TLS sequences never actually call it */
pub fn add_reserved_symbols(symtab: &mut SymbolTable, output_is_dynamic: bool)
{
    if output_is_dynamic == false
    {
        symtab.add_ignored("__tls_get_addr");
    }

    define_reserved(symtab, "_end", "end");
    define_reserved(symtab, "_etext", "etext");
    define_reserved(symtab, "_edata", "edata");
}

/* bracket the init/fini array sections. when a section is absent its
   bracket symbols still exist, pinned to zero, so crt code can take their
   difference and loop zero times */
pub fn add_start_end_symbols(symtab: &mut SymbolTable, out: &Out)
{
    let mut define = |start: &str, end: &str, sec: Option<OutSecId>|
    {
        match sec
        {
            Some(id) =>
            {
                symtab.add_synthetic(start, id, 0);
                symtab.add_synthetic(end, id, out.section(id).size);
            },
            None =>
            {
                symtab.add_ignored(start);
                symtab.add_ignored(end);
            }
        }
    };

    define("__preinit_array_start", "__preinit_array_end", out.preinit_array);
    define("__init_array_start", "__init_array_end", out.init_array);
    define("__fini_array_start", "__fini_array_end", out.fini_array);
}

/* a section name that works as a C identifier gets __start_/__stop_
   brackets, but only for references that are still dangling */
pub fn add_start_stop_symbols(symtab: &mut SymbolTable, out: &Out, sec: OutSecId)
{
    let name = out.section(sec).name.clone();
    if is_valid_c_identifier(&name) == false
    {
        return;
    }

    let start = format!("__start_{}", name);
    let stop = format!("__stop_{}", name);

    if let Some(id) = symtab.find(&start)
    {
        if symtab.get(symtab.repl(id)).is_undefined()
        {
            symtab.add_synthetic(&start, sec, 0);
        }
    }
    if let Some(id) = symtab.find(&stop)
    {
        if symtab.get(symtab.repl(id)).is_undefined()
        {
            symtab.add_synthetic(&stop, sec, out.section(sec).size);
        }
    }
}

/* references to __start_X/__stop_X where no section X exists resolve to
   zero instead of failing the link: iteration code treats an empty range
   as no entries */
pub fn ignore_unmatched_start_stop(symtab: &mut SymbolTable)
{
    let names: Vec<String> = symtab.globals()
        .map(|id| symtab.get(id).name.clone())
        .filter(|name|
        {
            let suffix = name.strip_prefix("__start_").or_else(|| name.strip_prefix("__stop_"));
            match suffix
            {
                Some(rest) => is_valid_c_identifier(rest),
                None => false
            }
        })
        .collect();

    for name in names
    {
        if let Some(id) = symtab.find(&name)
        {
            if symtab.get(symtab.repl(id)).is_undefined()
            {
                symtab.add_ignored(&name);
            }
        }
    }
}

/* static executables need the boundaries of the IRELATIVE relocations so
   their startup code can run the resolvers itself. dynamic output skips
   this: the loader handles those relocations through GOT and PLT */
pub fn add_rel_iplt_symbols(config: &Config, symtab: &mut SymbolTable, output_is_dynamic: bool,
                            out: &Out)
{
    if output_is_dynamic || out.rela_plt.is_none()
    {
        return;
    }

    let is_rela = config.is64;
    let start = if is_rela { "__rela_iplt_start" } else { "__rel_iplt_start" };
    let end = if is_rela { "__rela_iplt_end" } else { "__rel_iplt_end" };

    if symtab.find(start).is_some()
    {
        symtab.add_absolute(start, 0);
    }
    if symtab.find(end).is_some()
    {
        symtab.add_absolute(end, 0);
    }
}

/* C identifiers: [A-Za-z_][A-Za-z0-9_]*, which section names rarely are
   because of their leading dot */
pub fn is_valid_c_identifier(name: &str) -> bool
{
    let mut chars = name.chars();
    match chars.next()
    {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::config::default_config;
    use crate::symbol::SymbolBody;
    use crate::target::X86_64Target;

    #[test]
    fn c_identifier_rules()
    {
        assert!(is_valid_c_identifier("foo"));
        assert!(is_valid_c_identifier("_foo2"));
        assert!(is_valid_c_identifier(".text") == false);
        assert!(is_valid_c_identifier("2fast") == false);
        assert!(is_valid_c_identifier("") == false);
    }

    #[test]
    fn end_installed_only_when_referenced()
    {
        let mut symtab = SymbolTable::new();
        symtab.insert("_end");
        add_reserved_symbols(&mut symtab, false);

        let id = symtab.find("_end").unwrap();
        assert!(matches!(symtab.get(id).body, SymbolBody::Absolute { .. }));

        /* "etext" was never mentioned, so it doesn't spring into being */
        assert!(symtab.find("etext").is_none());
    }

    #[test]
    fn alias_not_clobbered_when_user_defined()
    {
        let mut symtab = SymbolTable::new();
        symtab.insert("_end");
        symtab.define("end", SymbolBody::Absolute { value: 42 });
        add_reserved_symbols(&mut symtab, false);

        let id = symtab.find("end").unwrap();
        /* the user's definition of "end" stands */
        assert!(matches!(symtab.get(id).body, SymbolBody::Absolute { value: 42 }));
    }

    #[test]
    fn tls_get_addr_ignored_for_static_links()
    {
        let mut symtab = SymbolTable::new();
        add_reserved_symbols(&mut symtab, false);
        let id = symtab.find("__tls_get_addr").unwrap();
        assert!(matches!(symtab.get(id).body, SymbolBody::Ignored));

        let mut dynamic_tab = SymbolTable::new();
        add_reserved_symbols(&mut dynamic_tab, true);
        assert!(dynamic_tab.find("__tls_get_addr").is_none());
    }

    #[test]
    fn start_stop_only_for_undefined_references()
    {
        let config = default_config();
        let target = X86_64Target;
        let mut out = Out::for_link(&config, &target);
        let mut symtab = SymbolTable::new();

        use crate::outsec::{ OutSection, SecBody };
        use goblin::elf::section_header::{ SHF_ALLOC, SHT_PROGBITS };
        let mut sec = OutSection::new("foo", SHT_PROGBITS, SHF_ALLOC as u64,
                                      SecBody::Regular { members: Vec::new() });
        sec.size = 0x40;
        let id = out.push_section(sec);

        symtab.insert("__start_foo");
        add_start_stop_symbols(&mut symtab, &out, id);

        let start = symtab.find("__start_foo").unwrap();
        assert!(matches!(symtab.get(start).body,
                         SymbolBody::DefinedSynthetic { section, value: 0 } if section == id));

        /* __stop_foo was never referenced: not created */
        assert!(symtab.find("__stop_foo").is_none());
    }

    #[test]
    fn unmatched_start_stop_references_become_ignored()
    {
        let mut symtab = SymbolTable::new();
        symtab.insert("__start_missing_section");
        symtab.insert("__stop_missing_section");
        symtab.insert("__start_.dotted");    /* not a C identifier: left alone */

        ignore_unmatched_start_stop(&mut symtab);

        let start = symtab.find("__start_missing_section").unwrap();
        assert!(matches!(symtab.get(start).body, SymbolBody::Ignored));
        let stop = symtab.find("__stop_missing_section").unwrap();
        assert!(matches!(symtab.get(stop).body, SymbolBody::Ignored));

        let dotted = symtab.find("__start_.dotted").unwrap();
        assert!(symtab.get(dotted).is_undefined());
    }
}
