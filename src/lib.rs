/* elfsmith
 *
 * Output-generation core of a static and dynamic ELF linker.
 *
 * The caller parses its inputs and resolves symbols, then hands this
 * crate a populated SymbolTable, a Config, a linker-script oracle and a
 * target capability. write_result() decides which output sections exist,
 * scans every relocation for GOT/PLT/copy/dynamic effects, materializes
 * the reserved symbols, orders the sections, builds program headers,
 * assigns addresses, and writes a valid ELF executable, shared object or
 * relocatable object in place through a memory mapping.
 *
 * There is no command line here: drivers live outside the core and fill
 * in Config, directly or from a toml file.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

extern crate goblin;
extern crate memmap2;
extern crate indexmap;
extern crate wildmatch;
extern crate serde;
extern crate serde_derive;
extern crate toml;

#[macro_use]
mod debug;    /* error-exit and progress macros */

pub mod config;   /* the link configuration */
pub mod report;   /* accumulated error reporting */
pub mod script;   /* linker-script oracle */
pub mod target;   /* per-architecture capability */
pub mod enc;      /* ELF class and byte-order serialization */
pub mod symbol;   /* symbol bodies and the symbol table */
pub mod input;    /* pre-parsed input files */
pub mod factory;  /* map input sections to output sections */
pub mod outsec;   /* output sections and their kinds */
pub mod synth;    /* sections the writer invents */
pub mod scan;     /* the relocation scanner */
pub mod reserved; /* linker-defined symbols */
pub mod bss;      /* common symbol and copy-relocation slots */
pub mod order;    /* output section ordering */
pub mod phdrs;    /* program-header construction */
pub mod layout;   /* file offsets and virtual addresses */
pub mod write;    /* the ELF writer */
pub mod link;     /* the pipeline driving all of the above */

pub use config::{ default_config, parse_config, Config };
pub use link::write_result;
pub use report::{ LinkError, Reporter };
pub use script::Script;
pub use symbol::SymbolTable;
pub use target::target_for;
