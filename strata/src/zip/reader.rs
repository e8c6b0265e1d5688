//! Zip-backed structured reconstituter.
//!
//! The whole archive is one [`FrozenRegion`] (typically a memory-mapped
//! file). Construction walks the central directory once and indexes every
//! entry into a tree keyed by path element; each leaf's payload is a
//! sub-range of the archive region, so reading an entry touches no buffers
//! and the archive mapping stays alive exactly as long as any view into it.

use super::format::{self, METHOD_STORE};
use crate::mapfile::map_file;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::{
    DirectoryEntry, EntryPath, FrozenRegion, PathElement, Result, StrataError,
    StructuredReconstituter,
};

/// One node of the entry index: an optional leaf payload plus children.
#[derive(Debug)]
struct EntryNode {
    path: EntryPath,
    region: Option<FrozenRegion>,
    children: BTreeMap<PathElement, Arc<EntryNode>>,
}

/// Mutable counterpart used while the index is being built.
#[derive(Default)]
struct NodeBuilder {
    path: EntryPath,
    region: Option<FrozenRegion>,
    children: BTreeMap<PathElement, NodeBuilder>,
}

fn freeze_node(builder: NodeBuilder) -> Arc<EntryNode> {
    Arc::new(EntryNode {
        path: builder.path,
        region: builder.region,
        children: builder
            .children
            .into_iter()
            .map(|(name, child)| (name, freeze_node(child)))
            .collect(),
    })
}

/// A structured reconstituter over a STORE-only zip archive.
#[derive(Debug)]
pub struct ZipStructuredReconstituter {
    node: Arc<EntryNode>,
}

impl ZipStructuredReconstituter {
    /// Memory-map the archive at a `file://` URL and index it.
    pub fn open(url: &str) -> Result<Self> {
        Self::from_region(map_file(url, 0, None)?)
    }

    /// Index an archive already held as a frozen region.
    pub fn from_region(region: FrozenRegion) -> Result<Self> {
        let bytes = region.as_slice();
        let end = format::find_end_of_central(bytes)?;

        let mut root = NodeBuilder::default();
        let mut cursor = usize::try_from(end.central_offset).map_err(|_| {
            StrataError::ArchiveFormat {
                offset: end.central_offset,
                cause: "central directory offset out of range".to_string(),
            }
        })?;

        for _ in 0..end.entry_count {
            let (record, next) = format::parse_central_header(bytes, cursor)?;
            cursor = next;

            // A trailing separator marks a directory placeholder entry.
            let is_directory = record.name.ends_with('/');
            if !is_directory && record.method != METHOD_STORE {
                return Err(StrataError::UnsupportedEntry {
                    name: record.name,
                    method: record.method,
                });
            }

            let payload = if is_directory {
                None
            } else {
                let start = format::payload_offset(bytes, record.local_header_offset)?;
                let end_offset = start + record.size;
                let sub = region
                    .range(start as usize, end_offset as usize)
                    .map_err(|_| StrataError::ArchiveFormat {
                        offset: record.local_header_offset,
                        cause: format!(
                            "payload of '{}' extends past the archive",
                            record.name
                        ),
                    })?;
                Some(sub)
            };

            // Tolerate repeated separators and parents that were never
            // listed as their own entries.
            let mut node = &mut root;
            let mut path = EntryPath::root();
            for piece in record.name.split('/').filter(|piece| !piece.is_empty()) {
                let element = PathElement::new(piece)?;
                path.push(element.clone());
                node = node.children.entry(element).or_default();
                node.path = path.clone();
            }
            if let Some(payload) = payload {
                node.region = Some(payload);
            }
        }

        Ok(Self {
            node: freeze_node(root),
        })
    }

    fn child(&self, name: &PathElement) -> Result<&Arc<EntryNode>> {
        self.node
            .children
            .get(name)
            .ok_or_else(|| StrataError::EntryNotFound {
                name: name.clone(),
                context: self.context(),
            })
    }
}

impl StructuredReconstituter for ZipStructuredReconstituter {
    fn context(&self) -> String {
        format!("zip://<archive>/{}", self.node.path)
    }

    fn get_directory(&self) -> Result<Vec<DirectoryEntry>> {
        Ok(self
            .node
            .children
            .iter()
            .map(|(name, child)| DirectoryEntry {
                name: name.clone(),
                region: child.region.clone(),
                structure: if child.children.is_empty() {
                    None
                } else {
                    Some(Arc::new(ZipStructuredReconstituter {
                        node: Arc::clone(child),
                    }) as Arc<dyn StructuredReconstituter>)
                },
            })
            .collect())
    }

    fn get_region(&self, name: &PathElement) -> Result<FrozenRegion> {
        let child = self.child(name)?;
        child
            .region
            .clone()
            .ok_or_else(|| StrataError::EntryNotFound {
                name: name.clone(),
                context: self.context(),
            })
    }

    fn get_structure(&self, name: &PathElement) -> Result<Arc<dyn StructuredReconstituter>> {
        let child = self.child(name)?;
        Ok(Arc::new(ZipStructuredReconstituter {
            node: Arc::clone(child),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::ZipStructuredSerializer;
    use parking_lot::Mutex;
    use std::io::Write;
    use strata_core::{MappedSerializer, MemorySerializer, StructuredSerializer};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn el(name: &str) -> PathElement {
        PathElement::new(name).unwrap()
    }

    fn region_of(bytes: &[u8]) -> FrozenRegion {
        let memory = MemorySerializer::new();
        let mut writable = memory.allocate_writable(bytes.len() as u64, 1).unwrap();
        writable.as_mut_slice().copy_from_slice(bytes);
        memory.freeze(writable).unwrap()
    }

    fn build_archive() -> FrozenRegion {
        let sink = SharedSink::default();
        let serializer = ZipStructuredSerializer::from_sink(Box::new(sink.clone()));

        serializer
            .add_region(&region_of(b"alpha bytes"), &el("a"))
            .unwrap();
        let b = serializer.new_structure(&el("b")).unwrap();
        b.add_region(&region_of(b"hello"), &el("c")).unwrap();
        drop(b);
        serializer.commit().unwrap();

        let bytes = sink.0.lock().clone();
        region_of(&bytes)
    }

    #[test]
    fn indexes_entries_into_a_tree() {
        let reconstituter = ZipStructuredReconstituter::from_region(build_archive()).unwrap();

        let directory = reconstituter.get_directory().unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory[0].name.as_str(), "a");
        assert!(directory[0].region.is_some());
        assert!(directory[0].structure.is_none());
        assert_eq!(directory[1].name.as_str(), "b");
        assert!(directory[1].region.is_none());
        assert!(directory[1].structure.is_some());

        assert_eq!(reconstituter.get_region(&el("a")).unwrap().as_slice(), b"alpha bytes");

        let b = reconstituter.get_structure(&el("b")).unwrap();
        assert_eq!(b.get_region(&el("c")).unwrap().as_slice(), b"hello");
        assert_eq!(b.context(), "zip://<archive>/b");
    }

    #[test]
    fn leaf_regions_are_subranges_of_the_archive() {
        let archive = build_archive();
        let archive_range =
            archive.as_ptr() as usize..archive.as_ptr() as usize + archive.len();
        let reconstituter = ZipStructuredReconstituter::from_region(archive.clone()).unwrap();

        let region = reconstituter.get_region(&el("a")).unwrap();
        assert!(archive_range.contains(&(region.as_ptr() as usize)));
    }

    #[test]
    fn missing_names_are_not_found() {
        let reconstituter = ZipStructuredReconstituter::from_region(build_archive()).unwrap();
        let err = reconstituter.get_region(&el("missing")).unwrap_err();
        assert!(err.is_not_found());
        let err = reconstituter.get_structure(&el("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rejects_compressed_entries() {
        let sink = SharedSink::default();
        let serializer = ZipStructuredSerializer::from_sink(Box::new(sink.clone()));
        serializer
            .add_region(&region_of(b"payload"), &el("entry"))
            .unwrap();
        serializer.commit().unwrap();
        let mut bytes = sink.0.lock().clone();

        // Patch the method field in both headers to DEFLATE.
        let eocd = format::find_end_of_central(&bytes).unwrap();
        let central = eocd.central_offset as usize;
        bytes[8..10].copy_from_slice(&8u16.to_le_bytes());
        bytes[central + 10..central + 12].copy_from_slice(&8u16.to_le_bytes());

        let err = ZipStructuredReconstituter::from_region(region_of(&bytes)).unwrap_err();
        assert!(matches!(err, StrataError::UnsupportedEntry { method: 8, .. }));
    }
}
