//! Hyperslab access to variable data.
//!
//! Only fixed-size element types are readable and writable here. Values are
//! exchanged in native byte order and converted to the stored order of the
//! variable. Writes past the end of an unlimited dimension extend it; reads
//! past the written extent return the fill value.

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};
use nc4h5_container::mem::slab_runs;
use tracing::trace;

use crate::error::{Error, Result};
use crate::file::File;
use crate::group::GroupId;
use crate::var::{Endianness, Var, VarId};

fn swap_with<B: ByteOrder>(buf: &mut [u8], elem_size: usize) {
    match elem_size {
        2 => {
            for chunk in buf.chunks_exact_mut(2) {
                let v = NativeEndian::read_u16(chunk);
                B::write_u16(chunk, v);
            }
        }
        4 => {
            for chunk in buf.chunks_exact_mut(4) {
                let v = NativeEndian::read_u32(chunk);
                B::write_u32(chunk, v);
            }
        }
        8 => {
            for chunk in buf.chunks_exact_mut(8) {
                let v = NativeEndian::read_u64(chunk);
                B::write_u64(chunk, v);
            }
        }
        _ => {}
    }
}

/// Convert elements between native order and the stored order. The
/// conversion is its own inverse.
pub(crate) fn convert_order(buf: &mut [u8], elem_size: usize, endianness: Endianness) {
    match endianness {
        Endianness::Native => {}
        Endianness::Big if cfg!(target_endian = "little") => swap_with::<BigEndian>(buf, elem_size),
        Endianness::Little if cfg!(target_endian = "big") => swap_with::<LittleEndian>(buf, elem_size),
        Endianness::Big | Endianness::Little => {}
    }
}

impl File {
    /// Make pending metadata visible before touching data.
    fn prepare_data_access(&mut self) -> Result<()> {
        if self.state.classic && self.state.define_mode {
            return Err(Error::InDefineMode);
        }
        if self.state.writable {
            self.flush_metadata()?;
            self.state.define_mode = false;
        }
        Ok(())
    }

    fn check_selection(&self, var: &Var, start: &[u64], count: &[u64]) -> Result<usize> {
        if !self.model.is_fixed_size(var.type_id)? {
            return Err(Error::UnsupportedElementType(format!(
                "data access to variable-length values of {}",
                var.name
            )));
        }
        if start.len() != var.ndims() || count.len() != var.ndims() {
            return Err(Error::InvalidArgument(format!(
                "selection of rank {} for {}-dimensional {}",
                start.len().max(count.len()),
                var.ndims(),
                var.name
            )));
        }
        for (axis, ((&s, &n), &did)) in start.iter().zip(count).zip(&var.dimids).enumerate() {
            let dim = self.model.dim(did)?;
            let end = s + n;
            let len = if dim.unlimited { self.model.dim_len(did)? } else { dim.len };
            // Writes may extend unlimited axes; callers check those.
            if !dim.unlimited && end > len {
                return Err(Error::OutOfBounds { axis, end, len });
            }
        }
        self.model.type_size(var.type_id)
    }

    /// Write `count` elements at `start`. `data` holds the values in native
    /// byte order, row-major.
    pub fn put_vara(&mut self, group: GroupId, var: VarId, start: &[u64], count: &[u64], data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.prepare_data_access()?;
        let v = self.model.var(group, var)?.clone();
        let size = self.check_selection(&v, start, count)?;
        let expected = count.iter().product::<u64>() as usize * size;
        if data.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "{} bytes for {expected}-byte selection of {}",
                data.len(),
                v.name
            )));
        }
        let obj = self
            .store
            .var_obj(group, var)
            .ok_or_else(|| Error::NotFound(format!("dataset of {}", v.name)))?;

        let grown: Vec<u64> = v
            .shape
            .iter()
            .zip(start.iter().zip(count))
            .map(|(&extent, (&s, &n))| extent.max(s + n))
            .collect();
        if grown != v.shape {
            self.store.container.set_extent(obj, &grown)?;
            self.model.var_mut(group, var)?.shape = grown;
            trace!(var = %v.name, "extended unlimited dimension");
        }

        let mut buf = data.to_vec();
        convert_order(&mut buf, size, v.endianness);
        self.store.container.write_slab(obj, start, count, &buf)?;
        self.model.var_mut(group, var)?.flags.written = true;
        Ok(())
    }

    /// Read `count` elements at `start`, in native byte order. Cells past the
    /// written extent read as the fill value.
    pub fn get_vara(&mut self, group: GroupId, var: VarId, start: &[u64], count: &[u64]) -> Result<Vec<u8>> {
        self.prepare_data_access()?;
        let v = self.model.var(group, var)?.clone();
        let size = self.check_selection(&v, start, count)?;
        let obj = self
            .store
            .var_obj(group, var)
            .ok_or_else(|| Error::NotFound(format!("dataset of {}", v.name)))?;

        let inside: Vec<u64> = v
            .shape
            .iter()
            .zip(start.iter().zip(count))
            .map(|(&extent, (&s, &n))| (s + n).min(extent).saturating_sub(s))
            .collect();
        let mut out = if inside == count {
            self.store.container.read_slab(obj, start, count)?
        } else {
            let fill = match (v.no_fill, self.effective_fill(&v)?) {
                (false, Some(fill)) => fill,
                _ => vec![0u8; size],
            };
            let total = count.iter().product::<u64>() as usize;
            let mut out = Vec::with_capacity(total * size);
            for _ in 0..total {
                out.extend_from_slice(&fill);
            }
            convert_order(&mut out, size, v.endianness);
            if inside.iter().all(|&n| n > 0) {
                let part = self.store.container.read_slab(obj, start, &inside)?;
                let origin = vec![0u64; count.len()];
                let mut pos = 0;
                for (off, n) in slab_runs(count, &origin, &inside) {
                    let (off, n) = (off as usize * size, n as usize * size);
                    out[off..off + n].copy_from_slice(&part[pos..pos + n]);
                    pos += n;
                }
            }
            out
        };
        convert_order(&mut out, size, v.endianness);
        Ok(out)
    }
}
