//! CPU-side data the device reads when it (re)builds a ref.
//!
//! Sources are borrowed for the duration of a single fill; the device never
//! keeps them. Refs remember where their data came from through the keys
//! defined here.

use super::state::VertexFormat;
use super::structs::Format;

/// Identifies one buffer group owned by the scene graph.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey(pub u32);

/// Identifies one image owned by the scene graph.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TextureKey(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct VertexStream<'a> {
    pub data: &'a [u8],
    pub format: VertexFormat,
    pub count: u32,
}

impl VertexStream<'_> {
    pub fn stride(&self) -> u32 {
        self.format.stride()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexStream<'a> {
    pub data: &'a [u16],
}

impl IndexStream<'_> {
    pub fn count(&self) -> u32 {
        self.data.len() as u32
    }
}

/// A set of vertex and index buffers drawn through shared refs.
pub trait BufferGroup {
    fn key(&self) -> GroupKey;
    fn vertex_stream(&self, idx: u32) -> Option<VertexStream<'_>>;
    fn index_stream(&self, idx: u32) -> Option<IndexStream<'_>>;

    /// Vertex data rewritten every frame.
    fn is_volatile(&self) -> bool {
        false
    }

    fn is_skinned(&self) -> bool {
        false
    }
}

/// Plain in-memory [`BufferGroup`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBufferGroup {
    pub key: Option<GroupKey>,
    pub format: VertexFormat,
    pub vertices: Vec<Vec<u8>>,
    pub indices: Vec<Vec<u16>>,
    pub volatile: bool,
    pub skinned: bool,
}

impl MemoryBufferGroup {
    pub fn new(key: GroupKey, format: VertexFormat) -> Self {
        Self {
            key: Some(key),
            format,
            ..Default::default()
        }
    }

    /// Appends a vertex buffer, returning its index within the group.
    pub fn add_vertices(&mut self, data: Vec<u8>) -> u32 {
        debug_assert_eq!(data.len() % self.format.stride() as usize, 0);
        self.vertices.push(data);
        self.vertices.len() as u32 - 1
    }

    pub fn add_indices(&mut self, data: Vec<u16>) -> u32 {
        self.indices.push(data);
        self.indices.len() as u32 - 1
    }
}

impl BufferGroup for MemoryBufferGroup {
    fn key(&self) -> GroupKey {
        self.key.unwrap_or(GroupKey(0))
    }

    fn vertex_stream(&self, idx: u32) -> Option<VertexStream<'_>> {
        let data = self.vertices.get(idx as usize)?;
        Some(VertexStream {
            data,
            format: self.format,
            count: (data.len() / self.format.stride() as usize) as u32,
        })
    }

    fn index_stream(&self, idx: u32) -> Option<IndexStream<'_>> {
        let data = self.indices.get(idx as usize)?;
        Some(IndexStream { data })
    }

    fn is_volatile(&self) -> bool {
        self.volatile
    }

    fn is_skinned(&self) -> bool {
        self.skinned
    }
}

/// Block compression applied to an image.
#[derive(Hash, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    Uncompressed,
    Dxt1,
    Dxt5,
}

/// A 2D image with its full mip chain, largest level first.
#[derive(Debug, Clone)]
pub struct Mipmap {
    pub key: TextureKey,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub compression: Compression,
    pub levels: Vec<Vec<u8>>,
}

impl Mipmap {
    pub fn new(key: TextureKey, width: u32, height: u32, format: Format) -> Self {
        let compression = match format {
            Format::BC1 => Compression::Dxt1,
            Format::BC3 => Compression::Dxt5,
            _ => Compression::Uncompressed,
        };
        Self {
            key,
            width,
            height,
            format,
            compression,
            levels: Vec::new(),
        }
    }

    /// Fills every level down to 1x1 with `texel`-sized zeroed data.
    pub fn with_full_chain(mut self) -> Self {
        let mut levels = Vec::new();
        let (mut w, mut h) = (self.width, self.height);
        loop {
            levels.push(vec![0u8; self.format.level_size(w, h)]);
            if w == 1 && h == 1 {
                break;
            }
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        self.levels = levels;
        self
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != Compression::Uncompressed
    }
}

/// Six square faces in +X, -X, +Y, -Y, +Z, -Z order.
#[derive(Debug, Clone)]
pub struct CubicEnvironmap {
    pub key: TextureKey,
    pub faces: [Mipmap; 6],
}

impl CubicEnvironmap {
    pub fn face(&self, idx: usize) -> &Mipmap {
        &self.faces[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_group_reports_vertex_counts() {
        let mut group = MemoryBufferGroup::new(GroupKey(9), VertexFormat::Standard);
        let idx = group.add_vertices(vec![0u8; 48 * 100]);
        let stream = group.vertex_stream(idx).unwrap();
        assert_eq!(stream.count, 100);
        assert_eq!(stream.stride(), 48);
        assert!(group.vertex_stream(idx + 1).is_none());
        assert_eq!(group.key(), GroupKey(9));
    }

    #[test]
    fn full_chain_ends_at_one_texel() {
        let image = Mipmap::new(TextureKey(1), 16, 4, Format::RGBA8).with_full_chain();
        assert_eq!(image.level_count(), 5);
        assert_eq!(image.level_extent(4), (1, 1));
        assert_eq!(image.levels[4].len(), 4);
        assert!(!image.is_compressed());
    }
}
