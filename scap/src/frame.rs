// Copyright (C) 2025 Marcus L. Hanestad <marlhan@proton.me>
//
// This file is part of DLNA Sender.
//
// DLNA Sender is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DLNA Sender is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with DLNA Sender.  If not, see <https://www.gnu.org/licenses/>.

//! Helpers for packed 32 bit BGRA frames.

use crate::Size;

/// Copy `height` rows of `row_len` bytes out of a buffer whose rows are `pitch` bytes apart.
///
/// `dst` is cleared first and ends up tightly packed.
pub fn copy_rows(src: &[u8], pitch: usize, row_len: usize, height: usize, dst: &mut Vec<u8>) {
    dst.clear();
    dst.reserve(row_len * height);
    for row in src.chunks(pitch).take(height) {
        let len = row_len.min(row.len());
        dst.extend_from_slice(&row[..len]);
    }
}

/// Nearest neighbour scale of a pitched BGRA image into a packed BGRA frame of `dst_size`.
///
/// `dst` must be exactly `dst_size.frame_len()` bytes.
pub fn scale_nearest(src: &[u8], src_size: Size, pitch: usize, dst_size: Size, dst: &mut [u8]) {
    let (sw, sh) = (src_size.width as usize, src_size.height as usize);
    let (dw, dh) = (dst_size.width as usize, dst_size.height as usize);
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return;
    }

    let x_map: Vec<usize> = (0..dw).map(|x| (x * sw / dw) * 4).collect();

    for (y, dst_row) in dst.chunks_exact_mut(dw * 4).take(dh).enumerate() {
        let src_row_start = (y * sh / dh) * pitch;
        let Some(src_row) = src.get(src_row_start..src_row_start + sw * 4) else {
            break;
        };
        for (dst_px, &sx) in dst_row.chunks_exact_mut(4).zip(&x_map) {
            dst_px.copy_from_slice(&src_row[sx..sx + 4]);
        }
    }
}
