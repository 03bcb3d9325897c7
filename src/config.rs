/* Parse the link configuration
 *
 * the driver in front of this crate fills one of these in, either directly
 * or from a toml file. nothing in here is consulted until the output core
 * starts running, so there are no process-wide option globals
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use serde_derive::Deserialize;
use goblin::elf::header::{ EM_386, EM_MIPS, EM_PPC64, EM_X86_64 };

/* AMD HSA code objects use their own machine number that goblin doesn't name */
pub const EM_AMDGPU: u16 = 224;

/* which processor the output file targets */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Machine
{
    X86_64,
    I386,
    Mips,
    Ppc64,
    Amdgpu
}

impl Machine
{
    pub fn e_machine(&self) -> u16
    {
        match self
        {
            Machine::X86_64 => EM_X86_64,
            Machine::I386 => EM_386,
            Machine::Mips => EM_MIPS,
            Machine::Ppc64 => EM_PPC64,
            Machine::Amdgpu => EM_AMDGPU
        }
    }
}

/* what to do with local symbols when building .symtab */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy
{
    None,       /* --discard-none: keep every local */
    Locals,     /* --discard-locals: drop assembler .L temporaries */
    All         /* --discard-all: copy no locals at all */
}

/* where execution starts: a symbol to resolve or a raw address */
#[derive(Clone, Debug)]
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entry
{
    Symbol(String),
    Address(u64),
    Default     /* no -e given: entry point is zero */
}

/* everything the output core needs to know about the requested link */
#[derive(Clone)]
#[derive(Deserialize)]
pub struct Config
{
    pub output_file: String,
    pub machine: Machine,

    /* output flavor */
    pub shared: bool,                       /* -shared: build a DSO */
    pub relocatable: bool,                  /* -r: build an ET_REL object */
    pub is64: bool,
    pub big_endian: bool,

    /* dynamic linking */
    pub dynamic_linker: Option<String>,     /* --dynamic-linker path for PT_INTERP */
    pub soname: Option<String>,
    pub rpath: Option<String>,
    pub export_dynamic: bool,
    pub as_needed: bool,                    /* --as-needed: DT_NEEDED only when referenced */
    pub gnu_hash: bool,
    pub sysv_hash: bool,

    /* symbol table handling */
    pub strip_all: bool,
    pub discard: DiscardPolicy,
    pub entry: Entry,

    /* diagnostics policy */
    pub no_inhibit_exec: bool,              /* undefined symbols downgrade to warnings */
    pub no_undefined: bool,                 /* report undefined even for -shared */
    pub print_gc_sections: bool,
    pub verbose: bool,

    /* -z keywords */
    pub z_relro: bool,
    pub z_now: bool,
    pub z_execstack: bool,

    /* MIPS quirks */
    pub mips64el: bool                      /* middle-endian relocation type packing */
}

impl Config
{
    /* which local symbols survive into .symtab */
    pub fn discard_all(&self) -> bool { self.discard == DiscardPolicy::All }
    pub fn discard_locals(&self) -> bool { self.discard == DiscardPolicy::Locals }
    pub fn discard_none(&self) -> bool { self.discard == DiscardPolicy::None }

    pub fn e_machine(&self) -> u16 { self.machine.e_machine() }
}

/* load the given toml string and parse it, returning a config structure */
pub fn parse_config(contents: &str) -> Result<Config, String>
{
    match toml::from_str(contents)
    {
        Ok(c) => Ok(c),
        Err(e) => Err(format!("can't parse configuration: {}", e))
    }
}

/* generate a basic, default configuration: a 64-bit little-endian x86-64
   executable written to a.out. drivers override fields from there */
pub fn default_config() -> Config
{
    Config
    {
        output_file: String::from("a.out"),
        machine: Machine::X86_64,
        shared: false,
        relocatable: false,
        is64: true,
        big_endian: false,
        dynamic_linker: None,
        soname: None,
        rpath: None,
        export_dynamic: false,
        as_needed: false,
        gnu_hash: true,
        sysv_hash: false,
        strip_all: false,
        discard: DiscardPolicy::None,
        entry: Entry::Default,
        no_inhibit_exec: false,
        no_undefined: false,
        print_gc_sections: false,
        verbose: false,
        z_relro: true,
        z_now: false,
        z_execstack: false,
        mips64el: false
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn defaults_are_a_plain_executable()
    {
        let config = default_config();
        assert_eq!(config.shared, false);
        assert_eq!(config.relocatable, false);
        assert_eq!(config.z_relro, true);
        assert_eq!(config.e_machine(), EM_X86_64);
    }

    #[test]
    fn config_parses_from_toml()
    {
        let toml = r#"
            output_file = "libdemo.so"
            machine = "x86_64"
            shared = true
            relocatable = false
            is64 = true
            big_endian = false
            export_dynamic = false
            as_needed = true
            gnu_hash = true
            sysv_hash = true
            strip_all = false
            discard = "locals"
            entry = "default"
            no_inhibit_exec = false
            no_undefined = false
            print_gc_sections = false
            verbose = false
            z_relro = true
            z_now = true
            z_execstack = false
            mips64el = false
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.shared, true);
        assert_eq!(config.discard_locals(), true);
        assert_eq!(config.z_now, true);
        assert!(config.dynamic_linker.is_none());
    }
}
