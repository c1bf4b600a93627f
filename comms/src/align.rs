// Primitive number types that can back a receiving buffer.
pub trait Align1: bytemuck::Pod {}

impl Align1 for u8 {}
impl Align1 for u32 {}
impl Align1 for u64 {}
impl Align1 for f32 {}
impl Align1 for f64 {}

// Receiving buffers whose element alignment is at least 4 bytes, so `f32`
// payloads can be viewed in place after the message header.
pub trait Align4: Align1 {}

impl Align4 for u32 {}
impl Align4 for u64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
