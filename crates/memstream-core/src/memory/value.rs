/// Plain values that can be decoded from and encoded to remote memory.
///
/// Values are little-endian, matching the targets the engine reads.
pub trait MemoryValue: Sized + Copy {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Decode from exactly [`SIZE`](Self::SIZE) bytes.
    fn from_bytes(bytes: &[u8]) -> Self;

    /// Encode into exactly [`SIZE`](Self::SIZE) bytes.
    fn write_bytes(&self, out: &mut [u8]);
}

macro_rules! impl_memory_value {
    ($($ty:ty),*) => {
        $(
            impl MemoryValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_bytes(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_memory_value!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl<const N: usize> MemoryValue for [u8; N] {
    const SIZE: usize = N;

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(&bytes[..N]);
        raw
    }

    fn write_bytes(&self, out: &mut [u8]) {
        out[..N].copy_from_slice(self);
    }
}
