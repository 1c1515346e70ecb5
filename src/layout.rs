// CLASSIFICATION: COMMUNITY
// Filename: layout.rs v0.8
// Date Modified: 2027-01-11
// Author: Lukas Bower

//! Canary layout math.
//!
//! Pure functions from a requested logical shape to a padded shape plus the
//! location of every poison slab. Linear regions get a fixed-length run
//! after the user bytes (and optionally before them, shifting addressing).
//! Multi-dimensional regions grow every populated axis independently; an
//! axis of extent 1 carries no data to overrun and is never padded.
//!
//! Slabs are enumerated in increasing dimensionality order (row-end runs,
//! then slice-end blocks, then whole trailing slices) so the flattened
//! canary stream is gap-free: every padded cell is either user data or a
//! member of exactly one slab.

/// Length in bytes of one linear poison run.
pub const POISON_FILL_LENGTH: usize = 8192;
/// Per-axis pad, in elements, for the first image dimension.
pub const IMAGE_POISON_WIDTH: usize = 16;
/// Per-axis pad, in elements, for the second image dimension.
pub const IMAGE_POISON_HEIGHT: usize = 16;
/// Per-axis pad, in elements, for the third image dimension.
pub const IMAGE_POISON_DEPTH: usize = 16;
/// The poison byte written into every canary cell.
pub const POISON_FILL: u8 = 0xC2;
/// Four poison bytes viewed as one little-endian word.
pub const POISON_FILL_32B: u32 = u32::from_le_bytes([POISON_FILL; 4]);
/// Poison run length in 32-bit words.
pub const POISON_WORD_LEN: usize = POISON_FILL_LENGTH / 4;

/// Number of linear poison runs per region for a given underflow setting.
pub fn poison_regions(underflow: bool) -> usize {
    if underflow {
        2
    } else {
        1
    }
}

/// Padded layout of a linear region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub logical_size: usize,
    pub underflow: bool,
}

impl BufferLayout {
    pub fn new(logical_size: usize, underflow: bool) -> Self {
        BufferLayout {
            logical_size,
            underflow,
        }
    }

    /// Offset of the first user byte inside the padded allocation.
    pub fn origin(&self) -> usize {
        if self.underflow {
            POISON_FILL_LENGTH
        } else {
            0
        }
    }

    pub fn padded_size(&self) -> usize {
        self.logical_size + poison_regions(self.underflow) * POISON_FILL_LENGTH
    }

    pub fn canary_byte_count(&self) -> usize {
        self.padded_size() - self.logical_size
    }

    /// Byte range of the leading poison run, when underflow checking is on.
    pub fn leading_run(&self) -> Option<core::ops::Range<usize>> {
        self.underflow.then(|| 0..POISON_FILL_LENGTH)
    }

    /// Byte range of the trailing poison run.
    pub fn trailing_run(&self) -> core::ops::Range<usize> {
        let start = self.origin() + self.logical_size;
        start..start + POISON_FILL_LENGTH
    }

    /// Build the padded initial contents: poison runs around the user
    /// bytes, zeroes where no initial content was supplied.
    pub fn build_poisoned(&self, init: Option<&[u8]>) -> Vec<u8> {
        let mut out = vec![0u8; self.padded_size()];
        if let Some(lead) = self.leading_run() {
            out[lead].fill(POISON_FILL);
        }
        if let Some(data) = init {
            let origin = self.origin();
            out[origin..origin + data.len().min(self.logical_size)]
                .copy_from_slice(&data[..data.len().min(self.logical_size)]);
        }
        out[self.trailing_run()].fill(POISON_FILL);
        out
    }
}

/// Dimensionality class of an image region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Dim1,
    Dim1Array,
    Dim2,
    Dim2Array,
    Dim3,
}

/// Channel layout of one image element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub channels: u8,
    pub channel_bytes: u8,
}

impl ImageFormat {
    pub fn element_size(&self) -> usize {
        self.channels as usize * self.channel_bytes as usize
    }
}

/// Requested image shape. Extents are in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub kind: ImageKind,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub array_size: usize,
    /// Host row pitch in bytes; 0 means tightly packed.
    pub row_pitch: usize,
    /// Host slice pitch in bytes; 0 means tightly packed.
    pub slice_pitch: usize,
}

impl ImageDesc {
    /// Force the fields a dimensionality class does not use to extent 1,
    /// so the rest of the engine can treat every image uniformly.
    pub fn normalized(mut self) -> Self {
        match self.kind {
            ImageKind::Dim1 => {
                self.height = 1;
                self.depth = 1;
                self.array_size = 1;
            }
            ImageKind::Dim1Array => {
                self.height = 1;
                self.depth = 1;
            }
            ImageKind::Dim2 => {
                self.depth = 1;
                self.array_size = 1;
            }
            ImageKind::Dim2Array => {
                self.depth = 1;
            }
            ImageKind::Dim3 => {
                self.array_size = 1;
            }
        }
        self
    }
}

/// Where one padded cell falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    UserData,
    RowEndCanary,
    SliceEndCanary,
    TailCanary,
}

/// One poison slab of an image layout, in padded-image element coordinates,
/// plus its offset inside the flattened canary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanarySlab {
    pub origin: [usize; 3],
    pub region: [usize; 3],
    pub stream_offset: usize,
}

impl CanarySlab {
    pub fn elems(&self) -> usize {
        self.region[0] * self.region[1] * self.region[2]
    }
}

/// Location of a corrupted canary cell, relative to the logical extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOverflowLoc {
    /// First-dimension overrun: `cols_past` columns past the end of
    /// logical row `row` in slice `slice`.
    RowEnd {
        cols_past: u32,
        row: u32,
        slice: u32,
    },
    /// Second-dimension overrun: `rows_past` rows past the end of slice
    /// `slice`.
    SliceEnd { rows_past: u32, slice: u32 },
    /// Third-dimension overrun: `slices_past` slices past the end.
    Tail { slices_past: u32 },
}

/// Padded layout of an image region.
///
/// Axis mapping follows the dimensionality class: the second axis carries
/// the array count for 1-D arrays, the third axis carries it for 2-D
/// arrays. `logical` is the data extent per axis, `padded` the grown one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub elem_size: usize,
    pub logical: [usize; 3],
    pub padded: [usize; 3],
}

fn pad_axis(extent: usize, pad: usize) -> usize {
    if extent > 1 {
        extent + pad
    } else {
        extent
    }
}

impl ImageLayout {
    /// Layout of an image the engine could not grow (caller-owned
    /// backing storage): padded extents equal the logical ones and there
    /// are no slabs.
    pub fn unpadded(desc: &ImageDesc, elem_size: usize) -> Self {
        let mut l = Self::new(desc, elem_size);
        l.padded = l.logical;
        l
    }

    pub fn new(desc: &ImageDesc, elem_size: usize) -> Self {
        let d = desc.normalized();
        let x = d.width;
        let y = if d.kind == ImageKind::Dim1Array {
            d.array_size
        } else {
            d.height
        };
        let z = if d.kind == ImageKind::Dim2Array {
            d.array_size
        } else {
            d.depth
        };
        ImageLayout {
            elem_size,
            logical: [x, y, z],
            padded: [
                pad_axis(x, IMAGE_POISON_WIDTH),
                pad_axis(y, IMAGE_POISON_HEIGHT),
                pad_axis(z, IMAGE_POISON_DEPTH),
            ],
        }
    }

    /// The padded shape written back into a descriptor of the same class.
    pub fn padded_desc(&self, desc: &ImageDesc) -> ImageDesc {
        let mut out = desc.normalized();
        out.width = self.padded[0];
        match out.kind {
            ImageKind::Dim1 => {}
            ImageKind::Dim1Array => out.array_size = self.padded[1],
            ImageKind::Dim2 => out.height = self.padded[1],
            ImageKind::Dim2Array => {
                out.height = self.padded[1];
                out.array_size = self.padded[2];
            }
            ImageKind::Dim3 => {
                out.height = self.padded[1];
                out.depth = self.padded[2];
            }
        }
        out.row_pitch = 0;
        out.slice_pitch = 0;
        out
    }

    pub fn logical_elems(&self) -> usize {
        self.logical.iter().product()
    }

    pub fn padded_elems(&self) -> usize {
        self.padded.iter().product()
    }

    pub fn logical_bytes(&self) -> usize {
        self.logical_elems() * self.elem_size
    }

    pub fn padded_bytes(&self) -> usize {
        self.padded_elems() * self.elem_size
    }

    pub fn canary_elems(&self) -> usize {
        self.padded_elems() - self.logical_elems()
    }

    pub fn canary_bytes(&self) -> usize {
        self.canary_elems() * self.elem_size
    }

    /// Enumerate every poison slab in increasing dimensionality order:
    /// row-end runs, then slice-end blocks per slice, then the whole
    /// trailing slices. Stream offsets are contiguous and gap-free.
    pub fn slabs(&self) -> Vec<CanarySlab> {
        let [xd, yd, zd] = self.logical;
        let [xl, yl, zl] = self.padded;
        let mut out = Vec::new();
        let mut stream = 0usize;
        for k in 0..zd {
            for j in 0..yd {
                if xl > 1 {
                    let slab = CanarySlab {
                        origin: [xd, j, k],
                        region: [xl - xd, 1, 1],
                        stream_offset: stream,
                    };
                    stream += slab.elems();
                    out.push(slab);
                }
            }
            if yl > yd {
                let slab = CanarySlab {
                    origin: [0, yd, k],
                    region: [xl, yl - yd, 1],
                    stream_offset: stream,
                };
                stream += slab.elems();
                out.push(slab);
            }
        }
        if zl > zd {
            let slab = CanarySlab {
                origin: [0, 0, zd],
                region: [xl, yl, zl - zd],
                stream_offset: stream,
            };
            out.push(slab);
        }
        out
    }

    /// Classify one padded cell. Cells are user data exactly when every
    /// coordinate is inside the logical extent; otherwise the first
    /// out-of-extent axis, checked outermost-first, names the slab class.
    pub fn classify(&self, p: [usize; 3]) -> CellKind {
        let [xd, yd, zd] = self.logical;
        if p[2] >= zd {
            CellKind::TailCanary
        } else if p[1] >= yd {
            CellKind::SliceEndCanary
        } else if p[0] >= xd {
            CellKind::RowEndCanary
        } else {
            CellKind::UserData
        }
    }

    /// Map a corrupted element index in the flattened canary stream back
    /// to a position relative to the logical extents.
    pub fn locate(&self, stream_elem: usize) -> Option<ImageOverflowLoc> {
        let [_, yd, _] = self.logical;
        let [xl, yl, _] = self.padded;
        for slab in self.slabs() {
            let local = stream_elem.checked_sub(slab.stream_offset)?;
            if local >= slab.elems() {
                continue;
            }
            let loc = if slab.origin[2] >= self.logical[2] {
                ImageOverflowLoc::Tail {
                    slices_past: (local / (xl * yl)) as u32,
                }
            } else if slab.origin[1] >= yd {
                ImageOverflowLoc::SliceEnd {
                    rows_past: (local / xl) as u32,
                    slice: slab.origin[2] as u32,
                }
            } else {
                ImageOverflowLoc::RowEnd {
                    cols_past: local as u32,
                    row: slab.origin[1] as u32,
                    slice: slab.origin[2] as u32,
                }
            };
            return Some(loc);
        }
        None
    }

    /// Build the flattened padded image: user rows copied from the host
    /// pointer (honoring its pitches) or zeroed, every canary cell
    /// poisoned.
    pub fn build_poisoned(&self, host: Option<&[u8]>, desc: &ImageDesc) -> Vec<u8> {
        let [xd, yd, zd] = self.logical;
        let [xl, yl, zl] = self.padded;
        let es = self.elem_size;
        let row_bytes = xd * es;
        let row_pitch = if desc.row_pitch != 0 {
            desc.row_pitch
        } else {
            row_bytes
        };
        let slice_pitch = if desc.slice_pitch != 0 {
            desc.slice_pitch
        } else {
            row_pitch * yd
        };
        let mut out = vec![0u8; self.padded_bytes()];
        for k in 0..zl {
            for j in 0..yl {
                let dst_row = (k * yl * xl + j * xl) * es;
                if k < zd && j < yd {
                    if let Some(src) = host {
                        let src_off = k * slice_pitch + j * row_pitch;
                        if src_off + row_bytes <= src.len() {
                            out[dst_row..dst_row + row_bytes]
                                .copy_from_slice(&src[src_off..src_off + row_bytes]);
                        }
                    }
                    out[dst_row + row_bytes..dst_row + xl * es].fill(POISON_FILL);
                } else {
                    out[dst_row..dst_row + xl * es].fill(POISON_FILL);
                }
            }
        }
        out
    }
}
