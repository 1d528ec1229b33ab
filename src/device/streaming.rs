use super::backend::{Backend, BufferHandle};
use super::vertex::{Vertex, VertexFormat};

/// Ring of transient vertices written once and drawn once.
///
/// Writes go to `[cursor, cursor + count)`. When that range does not fit, the
/// storage is orphaned and the cursor restarts at zero, so a write never lands
/// on vertices the GPU may still be reading.
#[derive(Debug)]
pub struct StreamingBuffer {
    handle: BufferHandle,
    format: VertexFormat,
    capacity: u32,
    cursor: u32,
    orphans: u32,
}

impl StreamingBuffer {
    pub fn new(backend: &mut dyn Backend, format: VertexFormat, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        let handle = backend.create_buffer(&vec![0; (capacity as u64 * format.stride()) as usize]);
        Self {
            handle,
            format,
            capacity,
            cursor: 0,
            orphans: 0,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn orphan_count(&self) -> u32 {
        self.orphans
    }

    /// Make room for `count` vertices and return the first index to write.
    ///
    /// A request larger than the whole ring grows it to
    /// `max(count, 2 * capacity)`, which is itself an orphan.
    pub fn reserve(&mut self, backend: &mut dyn Backend, count: u32) -> u32 {
        if count > self.capacity {
            let new_capacity = count.max(self.capacity.saturating_mul(2));
            log::warn!(
                "Streaming request of {} vertices exceeds capacity {}, growing to {}",
                count,
                self.capacity,
                new_capacity
            );
            self.capacity = new_capacity;
            self.orphan(backend);
        } else if self.cursor as u64 + count as u64 > self.capacity as u64 {
            self.orphan(backend);
        }
        self.cursor
    }

    fn orphan(&mut self, backend: &mut dyn Backend) {
        backend.orphan_buffer(self.handle, self.capacity as u64 * self.format.stride());
        // attribute bindings do not survive the new storage
        backend.bind_vertex_buffer(self.handle, self.format);
        self.cursor = 0;
        self.orphans += 1;
    }

    /// Copy `bytes` to vertex `first`, mapping when the backend allows it and
    /// falling back to a sub-range upload otherwise.
    pub fn upload(&mut self, backend: &mut dyn Backend, first: u32, bytes: &[u8]) {
        let offset = first as u64 * self.format.stride();
        let len = bytes.len() as u64;
        match backend.map_buffer_unsynchronized(self.handle, offset, len) {
            Some(mapped) => {
                mapped.copy_from_slice(bytes);
                backend.unmap_buffer(self.handle);
            }
            None => backend.update_buffer(self.handle, offset, bytes),
        }
    }

    /// Map `count` vertices from `first` for writing in place. The buffer
    /// stays mapped until `unmap`.
    pub fn map<'b>(&self, backend: &'b mut dyn Backend, first: u32, count: u32) -> Option<&'b mut [u8]> {
        let stride = self.format.stride();
        backend.map_buffer_unsynchronized(self.handle, first as u64 * stride, count as u64 * stride)
    }

    pub fn unmap(&self, backend: &mut dyn Backend) {
        backend.unmap_buffer(self.handle);
    }

    /// Sub-range upload without trying a map first.
    pub fn update(&self, backend: &mut dyn Backend, first: u32, bytes: &[u8]) {
        backend.update_buffer(self.handle, first as u64 * self.format.stride(), bytes);
    }

    pub fn advance(&mut self, count: u32) {
        self.cursor += count;
    }

    /// Reserve, upload and advance in one go. Returns the first vertex index.
    pub fn write<V: Vertex>(&mut self, backend: &mut dyn Backend, vertices: &[V]) -> u32 {
        debug_assert_eq!(V::FORMAT, self.format);
        let count = vertices.len() as u32;
        let first = self.reserve(backend, count);
        self.upload(backend, first, bytemuck::cast_slice(vertices));
        self.advance(count);
        first
    }

    pub fn bind(&self, backend: &mut dyn Backend) {
        backend.bind_vertex_buffer(self.handle, self.format);
    }

    pub fn destroy(&mut self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.handle);
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessBackend;
    use crate::device::vertex::Vertex2D;

    fn vertices(n: usize) -> Vec<Vertex2D> {
        (0..n)
            .map(|i| Vertex2D::new([i as f32, 0.0], [0.0, 0.0], [255; 4]))
            .collect()
    }

    #[test]
    fn writes_advance_the_cursor() {
        let mut backend = HeadlessBackend::new();
        let mut ring = StreamingBuffer::new(&mut backend, VertexFormat::Vertex2D, 16);

        assert_eq!(ring.write(&mut backend, &vertices(6)), 0);
        assert_eq!(ring.write(&mut backend, &vertices(6)), 6);
        assert_eq!(ring.cursor(), 12);
        assert_eq!(ring.orphan_count(), 0);
    }

    #[test]
    fn overflow_orphans_and_restarts() {
        let mut backend = HeadlessBackend::new();
        let trace = backend.trace();
        let mut ring = StreamingBuffer::new(&mut backend, VertexFormat::Vertex2D, 16);

        ring.write(&mut backend, &vertices(10));
        let first = ring.write(&mut backend, &vertices(10));

        assert_eq!(first, 0);
        assert_eq!(ring.cursor(), 10);
        assert_eq!(ring.orphan_count(), 1);
        assert_eq!(trace.borrow().orphans, 1);
        assert_eq!(trace.borrow().out_of_bounds_accesses, 0);
    }

    #[test]
    fn exact_fit_does_not_orphan() {
        let mut backend = HeadlessBackend::new();
        let mut ring = StreamingBuffer::new(&mut backend, VertexFormat::Vertex2D, 16);

        ring.write(&mut backend, &vertices(8));
        assert_eq!(ring.write(&mut backend, &vertices(8)), 8);
        assert_eq!(ring.orphan_count(), 0);
    }

    #[test]
    fn oversize_request_grows_the_ring() {
        let mut backend = HeadlessBackend::new();
        let trace = backend.trace();
        let mut ring = StreamingBuffer::new(&mut backend, VertexFormat::Vertex2D, 8);

        ring.write(&mut backend, &vertices(4));
        let first = ring.write(&mut backend, &vertices(20));

        assert_eq!(first, 0);
        assert_eq!(ring.capacity(), 20);
        assert_eq!(ring.cursor(), 20);
        let trace = trace.borrow();
        assert_eq!(trace.live_buffers[&ring.handle()], 20 * 20);
        assert_eq!(trace.out_of_bounds_accesses, 0);
    }

    #[test]
    fn refused_map_falls_back_to_upload() {
        let mut backend = HeadlessBackend::new().refusing_maps();
        let trace = backend.trace();
        let mut ring = StreamingBuffer::new(&mut backend, VertexFormat::Vertex2D, 8);

        let data = vertices(3);
        ring.write(&mut backend, &data);

        let trace = trace.borrow();
        assert_eq!(trace.refused_maps, 1);
        assert_eq!(trace.buffer_uploads, 1);
        let contents = &trace.buffer_contents[&ring.handle()];
        assert_eq!(&contents[..60], bytemuck::cast_slice::<_, u8>(&data));
    }
}
