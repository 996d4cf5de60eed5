#![forbid(unsafe_code)]
//! Fixed-width encoding utilities shared by the node codec, allocator, and log.

pub mod cell {
    //! Big-endian integer cells at fixed positions inside a buffer.

    const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Writes `v` big-endian into `dst[at..at + 8]`.
    pub fn put_u64(dst: &mut [u8], at: usize, v: u64) {
        dst[at..at + U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u64 from `src[at..at + 8]`.
    pub fn get_u64(src: &[u8], at: usize) -> u64 {
        let mut bytes = [0u8; U64_LEN];
        bytes.copy_from_slice(&src[at..at + U64_LEN]);
        u64::from_be_bytes(bytes)
    }

    /// Writes `v` big-endian into `dst[at..at + 4]`.
    pub fn put_u32(dst: &mut [u8], at: usize, v: u32) {
        dst[at..at + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u32 from `src[at..at + 4]`.
    pub fn get_u32(src: &[u8], at: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&src[at..at + 4]);
        u32::from_be_bytes(bytes)
    }

    /// Writes `v` big-endian into `dst[at..at + 2]`.
    pub fn put_u16(dst: &mut [u8], at: usize, v: u16) {
        dst[at..at + 2].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a big-endian u16 from `src[at..at + 2]`.
    pub fn get_u16(src: &[u8], at: usize) -> u16 {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&src[at..at + 2]);
        u16::from_be_bytes(bytes)
    }
}

/// Types with a constant encoded width, usable as keys or values of a tree.
///
/// Encoding must fill exactly `WIDTH` bytes of `dst`; decoding reads exactly
/// `WIDTH` bytes of `src`. Ordering of keys is taken from `Ord` on the decoded
/// type, so the encoding does not need to be order-preserving.
pub trait FixedCodec: Sized {
    /// Number of bytes occupied by one encoded value.
    const WIDTH: usize;

    /// Encode `self` into `dst[..WIDTH]`.
    fn encode_fixed(&self, dst: &mut [u8]);

    /// Decode a value from `src[..WIDTH]`.
    fn decode_fixed(src: &[u8]) -> Self;
}

macro_rules! impl_fixed_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedCodec for $ty {
                const WIDTH: usize = core::mem::size_of::<$ty>();

                fn encode_fixed(&self, dst: &mut [u8]) {
                    dst[..Self::WIDTH].copy_from_slice(&self.to_be_bytes());
                }

                fn decode_fixed(src: &[u8]) -> Self {
                    let mut bytes = [0u8; core::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&src[..Self::WIDTH]);
                    <$ty>::from_be_bytes(bytes)
                }
            }
        )*
    };
}

impl_fixed_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl<const N: usize> FixedCodec for [u8; N] {
    const WIDTH: usize = N;

    fn encode_fixed(&self, dst: &mut [u8]) {
        dst[..N].copy_from_slice(self);
    }

    fn decode_fixed(src: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&src[..N]);
        out
    }
}

impl<A: FixedCodec, B: FixedCodec> FixedCodec for (A, B) {
    const WIDTH: usize = A::WIDTH + B::WIDTH;

    fn encode_fixed(&self, dst: &mut [u8]) {
        self.0.encode_fixed(&mut dst[..A::WIDTH]);
        self.1.encode_fixed(&mut dst[A::WIDTH..Self::WIDTH]);
    }

    fn decode_fixed(src: &[u8]) -> Self {
        (
            A::decode_fixed(&src[..A::WIDTH]),
            B::decode_fixed(&src[A::WIDTH..Self::WIDTH]),
        )
    }
}
