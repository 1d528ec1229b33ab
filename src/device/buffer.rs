use super::backend::{Backend, BufferHandle};
use super::vertex::{PrimitiveType, VertexFormat};

/// Static vertex data owned by whoever created it.
///
/// Not `Clone`: hand it back to [`Device::destroy_vertex_buffer`](super::Device::destroy_vertex_buffer)
/// to release it. Buffers still alive at device teardown are released by the
/// device.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct VertexBuffer {
    handle: BufferHandle,
    primitive: PrimitiveType,
    format: VertexFormat,
    count: u32,
    capacity: u32,
}

impl VertexBuffer {
    pub(crate) fn new(
        handle: BufferHandle,
        primitive: PrimitiveType,
        format: VertexFormat,
        count: u32,
    ) -> Self {
        Self {
            handle,
            primitive,
            format,
            count,
            capacity: count,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive
    }

    pub fn vertex_count(&self) -> u32 {
        self.count
    }

    pub fn format(&self) -> VertexFormat {
        self.format
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    pub(crate) fn set_contents(&mut self, primitive: PrimitiveType, count: u32, capacity: u32) {
        self.primitive = primitive;
        self.count = count;
        self.capacity = capacity;
    }

    pub fn bind(&self, backend: &mut dyn Backend) {
        backend.bind_vertex_buffer(self.handle, self.format);
    }

    /// Bind and draw the whole buffer.
    pub(crate) fn draw(&self, backend: &mut dyn Backend) {
        if self.count == 0 {
            return;
        }
        self.bind(backend);
        backend.draw(self.primitive, 0, self.count);
    }
}
