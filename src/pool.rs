// Copyright (c) 2026, The QuicVeil Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Memory Pool
//!
//! A thread-safe free list of fixed-size, cache-aligned byte buffers
//! shared by the FEC payload arenas. Allocation and deallocation are
//! constant-time amortized; when the queue runs dry a fresh block is
//! allocated instead of blocking.

use aligned_box::AlignedBox;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

const BLOCK_ALIGN: usize = 64;

pub struct MemoryPool {
    pool: Arc<ArrayQueue<AlignedBox<[u8]>>>,
    block_size: usize,
}

impl MemoryPool {
    /// Creates a pool of `capacity` pre-allocated blocks of `block_size`
    /// bytes, all 64-byte aligned.
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let pool = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let _ = pool.push(Self::fresh_block(block_size));
        }
        Self {
            pool: Arc::new(pool),
            block_size,
        }
    }

    fn fresh_block(block_size: usize) -> AlignedBox<[u8]> {
        AlignedBox::<[u8]>::slice_from_value(BLOCK_ALIGN, block_size, 0u8)
            .expect("aligned buffer allocation")
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Pops a block from the free list, allocating a new one if the pool
    /// is exhausted.
    pub fn alloc(&self) -> AlignedBox<[u8]> {
        self.pool.pop().unwrap_or_else(|| {
            crate::telemetry::POOL_OVERFLOWS.inc();
            Self::fresh_block(self.block_size)
        })
    }

    /// Returns a block to the free list. The block is cleared before
    /// reuse; excess blocks are dropped.
    pub fn free(&self, mut block: AlignedBox<[u8]>) {
        block.iter_mut().for_each(|b| *b = 0);
        let _ = self.pool.push(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_cycle() {
        let pool = MemoryPool::new(4, 64);
        let a = pool.alloc();
        assert_eq!(a.len(), 64);
        pool.free(a);
    }

    #[test]
    fn exhausted_pool_still_allocates() {
        let pool = MemoryPool::new(1, 32);
        let a = pool.alloc();
        let b = pool.alloc();
        assert_eq!(b.len(), 32);
        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn freed_blocks_are_cleared() {
        let pool = MemoryPool::new(1, 16);
        let mut a = pool.alloc();
        a.iter_mut().for_each(|b| *b = 0xFF);
        pool.free(a);
        let again = pool.alloc();
        assert!(again.iter().all(|&b| b == 0));
    }

    #[test]
    fn blocks_are_cache_aligned() {
        let pool = MemoryPool::new(1, 128);
        let a = pool.alloc();
        assert_eq!(a.as_ptr() as usize % BLOCK_ALIGN, 0);
        pool.free(a);
    }
}
