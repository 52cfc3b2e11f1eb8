//! Object file backend: ELF inspection with aya-obj, loading with aya

use super::map_io_error;
use crate::ebpf::maps::{MapHandle, MapShape};
use crate::ebpf::{BpfObject, LoadedObject, MapSpec, ObjectOpener, ProgramHandle, ProgramSpec};
use crate::{Result, XdpctlError};
use aya::maps::{Map, MapData};
use aya::programs::{ProgramError, Xdp};
use aya::EbpfLoader;
use aya_obj::maps::PinningType;
use aya_obj::EbpfSectionKind;
use object::{Object, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};
use std::fs;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Programs and maps declared by an ELF object
#[derive(Debug, Default)]
pub struct ElfLayout {
    /// Entry points in file order
    pub programs: Vec<ProgramSpec>,
    /// `maps` and `.maps` definitions, by section then name
    pub maps: Vec<MapSpec>,
    /// Maps declared with pinning by name
    pub pinned_by_name: Vec<String>,
}

pub fn inspect_elf(data: &[u8]) -> std::result::Result<ElfLayout, String> {
    let declared = aya_obj::Object::parse(data).map_err(|e| format!("{e} ({e:?})"))?;
    let file = object::File::parse(data).map_err(|e| e.to_string())?;

    let mut layout = ElfLayout::default();

    for section in file.sections() {
        let name = section.name().map_err(|e| e.to_string())?;
        if section.kind() != SectionKind::Text || name == ".text" {
            continue;
        }

        let mut symbols: Vec<_> = file
            .symbols()
            .filter(|s| {
                s.section_index() == Some(section.index())
                    && s.kind() == SymbolKind::Text
                    && s.is_global()
            })
            .collect();
        symbols.sort_by_key(|s| s.address());

        for symbol in symbols {
            layout.programs.push(ProgramSpec {
                section: name.to_string(),
                name: symbol.name().map_err(|e| e.to_string())?.to_string(),
            });
        }
    }

    let mut maps: Vec<_> = declared
        .maps
        .iter()
        .filter(|(_, map)| {
            matches!(
                map.section_kind(),
                EbpfSectionKind::Maps | EbpfSectionKind::BtfMaps
            )
        })
        .collect();
    maps.sort_by_key(|(name, map)| (map.section_index(), name.as_str()));

    for (name, map) in maps {
        if map.pinning() == PinningType::ByName {
            layout.pinned_by_name.push(name.clone());
        }
        layout.maps.push(MapSpec {
            name: name.clone(),
            shape: MapShape::new(
                map.map_type(),
                map.key_size(),
                map.value_size(),
                map.max_entries(),
            ),
        });
    }

    Ok(layout)
}

fn into_map_data(map: Map) -> Option<MapData> {
    match map {
        Map::Array(data)
        | Map::PerCpuArray(data)
        | Map::HashMap(data)
        | Map::PerCpuHashMap(data)
        | Map::LruHashMap(data)
        | Map::PerCpuLruHashMap(data)
        | Map::ProgramArray(data)
        | Map::PerfEventArray(data)
        | Map::RingBuf(data)
        | Map::LpmTrie(data)
        | Map::DevMap(data)
        | Map::DevMapHash(data)
        | Map::XskMap(data)
        | Map::Unsupported(data) => Some(data),
        _ => None,
    }
}

fn load_error(program: &str, err: ProgramError) -> XdpctlError {
    match err {
        ProgramError::LoadError {
            io_error,
            verifier_log,
        } => XdpctlError::VerifierRejected {
            program: program.to_string(),
            reason: io_error.to_string(),
            log: verifier_log.to_string(),
        },
        other => XdpctlError::ProgramLoadFailed(format!("{}: {}", program, other)),
    }
}

pub struct AyaObjectOpener;

impl ObjectOpener for AyaObjectOpener {
    type Object = AyaObject;

    fn open(&self, path: &Path) -> Result<AyaObject> {
        let data = fs::read(path).map_err(|e| XdpctlError::ObjectOpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        AyaObject::from_bytes(path, data)
    }
}

pub struct AyaObject {
    path: PathBuf,
    data: Vec<u8>,
    layout: ElfLayout,
    pin_dir: Option<PathBuf>,
    rebound: Vec<MapHandle>,
}

impl AyaObject {
    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<Self> {
        let path = path.into();
        let layout = inspect_elf(&data).map_err(|reason| XdpctlError::ObjectOpenFailed {
            path: path.clone(),
            reason,
        })?;
        debug!(
            "{}: {} programs, {} maps ({} pinned by name)",
            path.display(),
            layout.programs.len(),
            layout.maps.len(),
            layout.pinned_by_name.len()
        );

        Ok(Self {
            path,
            data,
            layout,
            pin_dir: None,
            rebound: Vec::new(),
        })
    }

    fn rebind_failed(name: &str, reason: impl Into<String>) -> XdpctlError {
        XdpctlError::RebindFailed {
            map: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl BpfObject for AyaObject {
    fn path(&self) -> &Path {
        &self.path
    }

    fn programs(&self) -> &[ProgramSpec] {
        &self.layout.programs
    }

    fn maps(&self) -> &[MapSpec] {
        &self.layout.maps
    }

    /// aya reuses a pin only for maps declared pinned by name, looked up
    /// as `<pin path>/<map name>`
    fn rebind_map(&mut self, name: &str, pinned: MapHandle) -> Result<()> {
        if !self.layout.pinned_by_name.iter().any(|m| m == name) {
            return Err(Self::rebind_failed(
                name,
                "map is not declared with pinning by name",
            ));
        }

        let path = pinned
            .pinned_at()
            .ok_or_else(|| Self::rebind_failed(name, "handle was not opened from a pin"))?;
        if path.file_name().map_or(true, |f| f != name) {
            return Err(Self::rebind_failed(
                name,
                format!("pinned at {}, not under the map name", path.display()),
            ));
        }
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        if let Some(existing) = &self.pin_dir {
            if *existing != dir {
                return Err(Self::rebind_failed(
                    name,
                    format!(
                        "pinned under {} but other maps use {}",
                        dir.display(),
                        existing.display()
                    ),
                ));
            }
        }

        self.pin_dir = Some(dir);
        self.rebound.push(pinned);
        Ok(())
    }

    fn load(self, entry: &ProgramSpec) -> Result<LoadedObject> {
        let mut loader = EbpfLoader::new();
        if let Some(dir) = &self.pin_dir {
            loader.default_map_pin_directory(dir);
        }

        let mut ebpf = loader
            .load(&self.data)
            .map_err(|e| XdpctlError::ProgramLoadFailed(format!("{}: {}", self.path.display(), e)))?;

        let program: &mut Xdp = ebpf
            .program_mut(&entry.name)
            .ok_or_else(|| XdpctlError::ProgramNotFound {
                path: self.path.clone(),
                section: entry.section.clone(),
                available: self
                    .layout
                    .programs
                    .iter()
                    .map(|p| p.section.clone())
                    .collect(),
            })?
            .try_into()
            .map_err(|e| load_error(&entry.name, e))?;

        program.load().map_err(|e| load_error(&entry.name, e))?;

        let prog_id = program
            .info()
            .map_err(|e| load_error(&entry.name, e))?
            .id();
        let prog_fd = program
            .fd()
            .map_err(|e| load_error(&entry.name, e))?
            .as_fd()
            .try_clone_to_owned()?;
        let program = ProgramHandle::new(&entry.section, &entry.name, prog_id, prog_fd);

        let mut maps = Vec::with_capacity(self.layout.maps.len());
        for spec in &self.layout.maps {
            let Some(data) = ebpf.take_map(&spec.name).and_then(into_map_data) else {
                debug!("Map {} has no kernel object, skipping", spec.name);
                continue;
            };
            maps.push(MapHandle::from_map_data(&spec.name, data).map_err(map_io_error)?);
        }

        // a pin that vanished between open and load makes aya create a new map
        for pinned in &self.rebound {
            match maps.iter().find(|m| m.name() == pinned.name()) {
                Some(map) if map.id() == pinned.id() => {}
                Some(map) => {
                    return Err(Self::rebind_failed(
                        pinned.name(),
                        format!(
                            "loaded map id {} is not the pinned map id {}",
                            map.id(),
                            pinned.id()
                        ),
                    ));
                }
                None => return Err(Self::rebind_failed(pinned.name(), "map missing after load")),
            }
        }

        Ok(LoadedObject { program, maps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::pin_path;
    use crate::ebpf::maps::map_type;
    use crate::ebpf::{MapStore, ProgramLoader};
    use object::write::{Object as ElfWriter, SectionId, Symbol, SymbolSection};
    use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolScope};
    use std::collections::HashMap;
    use std::fs::File;
    use std::io;
    use std::os::fd::OwnedFd;
    use tempfile::TempDir;

    const BTF_INT: u32 = 1;
    const BTF_PTR: u32 = 2;
    const BTF_ARRAY: u32 = 3;
    const BTF_STRUCT: u32 = 4;
    const BTF_VAR: u32 = 14;
    const BTF_DATASEC: u32 = 15;

    /// Type and string sections of a `.BTF` blob; type ids follow push order
    struct Btf {
        types: Vec<u8>,
        strings: Vec<u8>,
        next_id: u32,
    }

    impl Btf {
        fn new() -> Self {
            Self {
                types: Vec::new(),
                strings: vec![0],
                next_id: 1,
            }
        }

        fn name(&mut self, name: &str) -> u32 {
            let offset = self.strings.len() as u32;
            self.strings.extend_from_slice(name.as_bytes());
            self.strings.push(0);
            offset
        }

        fn push(&mut self, name_off: u32, kind: u32, vlen: u32, size_or_type: u32, extra: &[u32]) -> u32 {
            for word in [name_off, kind << 24 | vlen, size_or_type]
                .iter()
                .chain(extra)
            {
                self.types.extend_from_slice(&word.to_le_bytes());
            }
            self.next_id += 1;
            self.next_id - 1
        }

        fn int(&mut self, name: &str, size: u32) -> u32 {
            let name = self.name(name);
            self.push(name, BTF_INT, 0, size, &[size * 8])
        }

        fn ptr(&mut self, target: u32) -> u32 {
            self.push(0, BTF_PTR, 0, target, &[])
        }

        /// `int (*field)[value]`, how `__uint(field, value)` is encoded
        fn uint_field(&mut self, int: u32, value: u32) -> u32 {
            let array = self.push(0, BTF_ARRAY, 0, 0, &[int, int, value]);
            self.ptr(array)
        }

        fn finish(self) -> Vec<u8> {
            let type_len = self.types.len() as u32;
            let mut blob = Vec::new();
            blob.extend_from_slice(&0xeb9fu16.to_le_bytes());
            blob.push(1);
            blob.push(0);
            for word in [24, 0, type_len, type_len, self.strings.len() as u32] {
                blob.extend_from_slice(&word.to_le_bytes());
            }
            blob.extend_from_slice(&self.types);
            blob.extend_from_slice(&self.strings);
            blob
        }
    }

    /// `.maps` entry for `xdp_stat_map`: array, u32 key, u64 value,
    /// 6 entries, pinned by name
    fn stats_map_btf() -> Vec<u8> {
        let mut btf = Btf::new();
        let int = btf.int("int", 4);
        let u32_type = btf.int("unsigned int", 4);
        let u64_type = btf.int("long long unsigned int", 8);

        let members = [
            ("type", btf.uint_field(int, map_type::ARRAY)),
            ("key", btf.ptr(u32_type)),
            ("value", btf.ptr(u64_type)),
            ("max_entries", btf.uint_field(int, 6)),
            ("pinning", btf.uint_field(int, 1)),
        ];
        let mut words = Vec::new();
        for (i, (name, ty)) in members.iter().enumerate() {
            words.extend([btf.name(name), *ty, i as u32 * 64]);
        }
        let def = btf.push(0, BTF_STRUCT, members.len() as u32, 40, &words);

        let var_name = btf.name("xdp_stat_map");
        let var = btf.push(var_name, BTF_VAR, 0, def, &[1]);
        let sec_name = btf.name(".maps");
        btf.push(sec_name, BTF_DATASEC, 1, 40, &[var, 0, 40]);
        btf.finish()
    }

    fn add_symbol(
        elf: &mut ElfWriter<'_>,
        name: &str,
        section: SectionId,
        value: u64,
        size: u64,
        kind: object::SymbolKind,
    ) {
        elf.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size,
            kind,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
    }

    /// Two programs in `xdp`, a legacy `tx_port` hash map and the BTF
    /// stats map
    fn stats_object() -> Vec<u8> {
        let mut elf = ElfWriter::new(BinaryFormat::Elf, Architecture::Bpf, Endianness::Little);

        let xdp = elf.add_section(Vec::new(), b"xdp".to_vec(), SectionKind::Text);
        elf.append_section_data(xdp, &[0u8; 16], 8);
        add_symbol(&mut elf, "xdp_second", xdp, 8, 8, SymbolKind::Text);
        add_symbol(&mut elf, "xdp_first", xdp, 0, 8, SymbolKind::Text);

        // bpf_map_def: type, key, value, max_entries, flags, id, pinning
        let legacy = elf.add_section(Vec::new(), b"maps".to_vec(), SectionKind::Data);
        let mut def = Vec::new();
        for word in [map_type::HASH, 4, 4, 64, 0, 0, 0] {
            def.extend_from_slice(&word.to_le_bytes());
        }
        elf.append_section_data(legacy, &def, 4);
        add_symbol(&mut elf, "tx_port", legacy, 0, def.len() as u64, SymbolKind::Data);

        let btf_maps = elf.add_section(Vec::new(), b".maps".to_vec(), SectionKind::Data);
        elf.append_section_data(btf_maps, &[0u8; 40], 8);
        add_symbol(&mut elf, "xdp_stat_map", btf_maps, 0, 40, SymbolKind::Data);

        let btf = elf.add_section(Vec::new(), b".BTF".to_vec(), SectionKind::Other);
        elf.append_section_data(btf, &stats_map_btf(), 4);

        elf.write().expect("write ELF")
    }

    fn null_fd() -> OwnedFd {
        File::open("/dev/null").expect("open /dev/null").into()
    }

    fn pinned(dir: &Path, name: &str, shape: MapShape) -> MapHandle {
        MapHandle::new(name, null_fd(), 9, shape).with_pinned_at(dir.join(name))
    }

    #[test]
    fn test_inspect_programs_in_address_order() {
        let layout = inspect_elf(&stats_object()).expect("inspect");

        let programs: Vec<_> = layout
            .programs
            .iter()
            .map(|p| (p.section.as_str(), p.name.as_str()))
            .collect();
        assert_eq!(programs, vec![("xdp", "xdp_first"), ("xdp", "xdp_second")]);
    }

    #[test]
    fn test_inspect_legacy_and_btf_map_shapes() {
        let layout = inspect_elf(&stats_object()).expect("inspect");

        assert_eq!(
            layout.maps,
            vec![
                MapSpec {
                    name: "tx_port".to_string(),
                    shape: MapShape::new(map_type::HASH, 4, 4, 64),
                },
                MapSpec {
                    name: "xdp_stat_map".to_string(),
                    shape: MapShape::new(map_type::ARRAY, 4, 8, 6),
                },
            ]
        );
        assert_eq!(layout.pinned_by_name, vec!["xdp_stat_map"]);
    }

    #[test]
    fn test_inspect_rejects_non_elf() {
        assert!(inspect_elf(b"not an object file").is_err());
    }

    #[test]
    fn test_rebind_requires_pinning_by_name() {
        let dir = Path::new("/sys/fs/bpf/eth0");
        let mut object = AyaObject::from_bytes("stats.o", stats_object()).expect("open");

        let err = object
            .rebind_map("tx_port", pinned(dir, "tx_port", MapShape::new(map_type::HASH, 4, 4, 64)))
            .unwrap_err();
        assert!(matches!(err, XdpctlError::RebindFailed { ref map, .. } if map == "tx_port"));
        assert_eq!(err.exit_code(), crate::error::exit_code::FAIL_BPF);

        object
            .rebind_map(
                "xdp_stat_map",
                pinned(dir, "xdp_stat_map", MapShape::stats_table()),
            )
            .expect("pinned by name");
        assert_eq!(object.pin_dir.as_deref(), Some(dir));
    }

    #[test]
    fn test_rebind_rejects_handle_without_pin() {
        let mut object = AyaObject::from_bytes("stats.o", stats_object()).expect("open");
        let handle = MapHandle::new("xdp_stat_map", null_fd(), 9, MapShape::stats_table());

        assert!(matches!(
            object.rebind_map("xdp_stat_map", handle),
            Err(XdpctlError::RebindFailed { .. })
        ));
        assert!(object.rebound.is_empty());
    }

    /// Pinned shapes keyed by path
    struct ShapeStore(HashMap<PathBuf, MapShape>);

    impl MapStore for ShapeStore {
        fn pin(&self, _map: &MapHandle, _path: &Path) -> io::Result<()> {
            Ok(())
        }

        fn open_pinned(&self, path: &Path) -> io::Result<MapHandle> {
            let shape = self
                .0
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            Ok(MapHandle::new(name, null_fd(), 9, shape).with_pinned_at(path))
        }
    }

    #[test]
    fn test_reuse_against_btf_map_checks_declared_shape() {
        let dir = TempDir::new().unwrap();
        let object_path = dir.path().join("stats.o");
        fs::write(&object_path, stats_object()).unwrap();
        let base = dir.path().join("bpf");

        let mut pins = HashMap::new();
        pins.insert(
            pin_path(&base, "eth0", "tx_port"),
            MapShape::new(map_type::HASH, 4, 4, 64),
        );
        // pinned by an older build with a wider counter record
        pins.insert(
            pin_path(&base, "eth0", "xdp_stat_map"),
            MapShape::new(map_type::ARRAY, 4, 16, 6),
        );

        let loader = ProgramLoader::new(AyaObjectOpener, ShapeStore(pins));
        let err = loader
            .load_with(&object_path, None, Some((&base, "eth0")))
            .unwrap_err();

        match err {
            XdpctlError::ShapeMismatch {
                map,
                field,
                expected,
                found,
            } => {
                assert_eq!(map, "xdp_stat_map");
                assert_eq!(field, "value size");
                assert_eq!(expected, 8);
                assert_eq!(found, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
