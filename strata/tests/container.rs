//! End-to-end tests: build a structured container, persist it through the
//! zip backend, memory-map it back and read the same bytes.

use serde::{Deserialize, Serialize};
use std::io::Write;
use strata::{
    map_file, EntryPath, FileSerializer, MappedSerializer, MemorySerializer, PathElement,
    StructuredReconstituter, StructuredReconstituterExt, StructuredSerializer,
    StructuredSerializerExt, ZipStructuredReconstituter, ZipStructuredSerializer,
};
use tempfile::tempdir;

fn el(name: &str) -> PathElement {
    PathElement::new(name).unwrap()
}

fn frozen(bytes: &[u8]) -> strata::FrozenRegion {
    let memory = MemorySerializer::new();
    let mut writable = memory.allocate_writable(bytes.len() as u64, 1).unwrap();
    writable.as_mut_slice().copy_from_slice(bytes);
    memory.freeze(writable).unwrap()
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct ColumnSummary {
    rows: u64,
    name: String,
    sorted: bool,
}

#[test]
fn zip_round_trip_through_a_mapped_file() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("container.zip");

    let ascending: Vec<u8> = (0u16..256).map(|b| b as u8).collect();
    let big = vec![0x5Au8; 1 << 20];

    {
        let serializer = ZipStructuredSerializer::create(&archive_path).unwrap();
        serializer.add_region(&frozen(&ascending), &el("a")).unwrap();

        let b = serializer.new_structure(&el("b")).unwrap();
        {
            let mut stream = b.new_stream(&el("c")).unwrap();
            stream.write_all(b"hello").unwrap();
            stream.finish().unwrap();
        }
        {
            let entry = b.new_entry(&el("d")).unwrap();
            let mut writable = entry.allocate_writable(big.len() as u64, 1).unwrap();
            writable.as_mut_slice().copy_from_slice(&big);
            entry.freeze(writable).unwrap();
        }
        drop(b);
        serializer.commit().unwrap();
    }

    let url = format!("file://{}", archive_path.display());
    let reconstituter = ZipStructuredReconstituter::open(&url).unwrap();

    let directory = reconstituter.get_directory().unwrap();
    let names: Vec<&str> = directory.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);

    assert_eq!(
        reconstituter.get_region(&el("a")).unwrap().as_slice(),
        ascending.as_slice()
    );

    let c = reconstituter
        .get_region_recursive(&EntryPath::parse("b/c").unwrap())
        .unwrap();
    assert_eq!(c.as_slice(), b"hello");

    let d = reconstituter
        .get_region_recursive(&EntryPath::parse("b/d").unwrap())
        .unwrap();
    assert_eq!(d.len(), 1 << 20);
    assert!(d.as_slice().iter().all(|&b| b == 0x5A));
}

#[test]
fn entry_regions_share_the_archive_mapping() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("container.zip");

    {
        let serializer = ZipStructuredSerializer::create(&archive_path).unwrap();
        serializer.add_region(&frozen(b"payload"), &el("entry")).unwrap();
        serializer.commit().unwrap();
    }

    let url = format!("file://{}", archive_path.display());
    let archive = map_file(&url, 0, None).unwrap();
    let base = archive.as_ptr() as usize;
    let len = archive.len();

    let region = ZipStructuredReconstituter::from_region(archive)
        .unwrap()
        .get_region(&el("entry"))
        .unwrap();

    let ptr = region.as_ptr() as usize;
    assert!(ptr >= base && ptr + region.len() <= base + len);
    assert_eq!(region.as_slice(), b"payload");
}

#[test]
fn object_entries_round_trip_as_json() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("container.zip");

    let summary = ColumnSummary {
        rows: 12_345,
        name: "price".to_string(),
        sorted: true,
    };

    {
        let serializer = ZipStructuredSerializer::create(&archive_path).unwrap();
        let meta = serializer.new_structure(&el("meta")).unwrap();
        meta.new_object(&el("column"), &summary).unwrap();
        drop(meta);
        serializer.commit().unwrap();
    }

    let url = format!("file://{}", archive_path.display());
    let reconstituter = ZipStructuredReconstituter::open(&url).unwrap();
    let read_back: ColumnSummary = reconstituter
        .get_structure(&el("meta"))
        .unwrap()
        .get_object(&el("column"))
        .unwrap();
    assert_eq!(read_back, summary);
}

#[test]
fn streams_seek_over_reconstituted_entries() {
    use std::io::{Read, Seek, SeekFrom};

    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("container.zip");

    {
        let serializer = ZipStructuredSerializer::create(&archive_path).unwrap();
        serializer
            .add_region(&frozen(b"0123456789"), &el("digits"))
            .unwrap();
        serializer.commit().unwrap();
    }

    let url = format!("file://{}", archive_path.display());
    let reconstituter = ZipStructuredReconstituter::open(&url).unwrap();
    let mut stream = reconstituter.get_stream(&el("digits")).unwrap();

    let mut buf = [0u8; 3];
    stream.seek(SeekFrom::End(-3)).unwrap();
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"789");

    stream.seek(SeekFrom::Start(2)).unwrap();
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"234");
}

#[test]
fn recursive_lookup_rejects_the_empty_path() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("container.zip");

    {
        let serializer = ZipStructuredSerializer::create(&archive_path).unwrap();
        serializer.add_region(&frozen(b"x"), &el("entry")).unwrap();
        serializer.commit().unwrap();
    }

    let url = format!("file://{}", archive_path.display());
    let reconstituter = ZipStructuredReconstituter::open(&url).unwrap();
    assert!(reconstituter
        .get_region_recursive(&EntryPath::root())
        .is_err());
}

#[test]
fn file_serializer_grows_to_many_large_regions() {
    let dir = tempdir().unwrap();
    let serializer = FileSerializer::create(dir.path().join("columns.bin")).unwrap();

    const REGION_LEN: usize = 16 << 20;
    let mut regions = Vec::new();
    for fill in 0u8..10 {
        let mut writable = serializer.allocate_writable(REGION_LEN as u64, 1).unwrap();
        writable.as_mut_slice().fill(fill);
        regions.push(serializer.freeze(writable).unwrap());
    }

    for (fill, region) in regions.iter().enumerate() {
        assert_eq!(region.len(), REGION_LEN);
        assert!(region.as_slice().iter().all(|&b| b == fill as u8));
    }

    serializer.commit().unwrap();
    let disk = std::fs::metadata(serializer.path()).unwrap().len();
    assert_eq!(disk, serializer.populated_len());
    assert!(disk >= (10 * REGION_LEN) as u64);
}

#[test]
fn file_serializer_output_can_be_mapped_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("columns.bin");

    {
        let serializer = FileSerializer::create(&path).unwrap();
        let mut writable = serializer.allocate_writable(8192, 1).unwrap();
        for (i, byte) in writable.as_mut_slice().iter_mut().enumerate() {
            *byte = (i % 256) as u8;
        }
        serializer.freeze(writable).unwrap();
        serializer.commit().unwrap();
    }

    let region = map_file(path.to_str().unwrap(), 0, Some(8192)).unwrap();
    for (i, byte) in region.as_slice().iter().enumerate() {
        assert_eq!(*byte, (i % 256) as u8);
    }
}
