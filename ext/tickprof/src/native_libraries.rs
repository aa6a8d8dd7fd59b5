use std::collections::BTreeMap;
use std::fs;

use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;

use crate::error::SymbolsError;
use crate::symbols::Symbols;

const PROC_SELF_MAPS: &str = "/proc/self/maps";
const PAGE_MASK: u64 = !0xfff;

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, PartialEq, Eq)]
struct MapsEntry {
    start: usize,
    end: usize,
    executable: bool,
    offset: u64,
    path: String,
}

impl MapsEntry {
    // 7f2c4a200000-7f2c4a228000 r-xp 00028000 08:01 1234    /usr/lib/libc.so.6
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let permissions = fields.next()?;
        let offset = fields.next()?;
        let _device = fields.next()?;
        let _inode = fields.next()?;
        let path = fields.collect::<Vec<_>>().join(" ");

        Some(Self {
            start: usize::from_str_radix(start, 16).ok()?,
            end: usize::from_str_radix(end, 16).ok()?,
            executable: permissions.as_bytes().get(2) == Some(&b'x'),
            offset: u64::from_str_radix(offset, 16).ok()?,
            path,
        })
    }
}

// Path of every file-backed object with an executable mapping, and the
// address its first page is mapped at
fn executable_objects(maps: &str) -> BTreeMap<String, usize> {
    let entries: Vec<MapsEntry> = maps.lines().filter_map(MapsEntry::parse).collect();
    let mut objects = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.executable && e.path.starts_with('/')) {
        let base = entries
            .iter()
            .filter(|e| e.path == entry.path && e.offset == 0)
            .map(|e| e.start)
            .min();
        if let Some(base) = base {
            objects.insert(entry.path.clone(), base);
        }
    }
    objects
}

fn read_functions(path: &str, base: usize) -> Result<Vec<(usize, usize, String)>, SymbolsError> {
    let bytes = fs::read(path).map_err(|source| SymbolsError::Io {
        path: path.to_owned(),
        source,
    })?;
    let elf = Elf::parse(&bytes).map_err(|source| SymbolsError::Elf {
        path: path.to_owned(),
        source,
    })?;

    // Works for both position-independent objects and fixed executables
    let first_load = elf
        .program_headers
        .iter()
        .find(|header| header.p_type == PT_LOAD && header.p_offset == 0)
        .map(|header| header.p_vaddr & PAGE_MASK)
        .unwrap_or(0);
    let bias = (base as u64).wrapping_sub(first_load);

    let static_symbols = elf.syms.iter().map(|sym| (sym, &elf.strtab));
    let dynamic_symbols = elf.dynsyms.iter().map(|sym| (sym, &elf.dynstrtab));
    let functions = static_symbols
        .chain(dynamic_symbols)
        .filter(|(sym, _)| sym.is_function() && sym.st_value != 0 && sym.st_size != 0)
        .filter_map(|(sym, strtab)| {
            let name = strtab.get_at(sym.st_name)?;
            Some((
                sym.st_value.wrapping_add(bias) as usize,
                sym.st_size as usize,
                name.to_owned(),
            ))
        })
        .collect();
    Ok(functions)
}

// Unreadable objects are skipped
pub(crate) fn load_mapped_objects(symbols: &Symbols) -> Result<usize, SymbolsError> {
    let maps = fs::read_to_string(PROC_SELF_MAPS).map_err(|source| SymbolsError::Io {
        path: PROC_SELF_MAPS.to_owned(),
        source,
    })?;

    let mut added = 0;
    for (path, base) in executable_objects(&maps) {
        if symbols.is_library_loaded(&path) {
            continue;
        }
        let functions = match read_functions(&path, base) {
            Ok(functions) => functions,
            Err(err) => {
                log::warn!("Skipping native library: {}", err);
                continue;
            }
        };
        if symbols.add_library(&path, functions)? {
            added += 1;
        }
    }
    log::debug!("{} native libraries loaded", added);
    Ok(added)
}
