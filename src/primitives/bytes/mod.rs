#![forbid(unsafe_code)]
//! Big-endian encoders shared by the key codec and the store header.

pub mod ord {
    //! Order-preserving encoders for unsigned keys and raw signed values.
    //!
    //! Callers pass slices at least as long as the encoded width; shorter
    //! slices are a layout bug and panic.

    macro_rules! be_codec {
        ($put:ident, $get:ident, $ty:ty) => {
            #[doc = concat!("Writes a `", stringify!($ty), "` big-endian into the front of `dst`.")]
            pub fn $put(dst: &mut [u8], v: $ty) {
                const LEN: usize = core::mem::size_of::<$ty>();
                assert!(
                    dst.len() >= LEN,
                    concat!(stringify!($ty), " destination too small")
                );
                dst[..LEN].copy_from_slice(&v.to_be_bytes());
            }

            #[doc = concat!("Reads a big-endian `", stringify!($ty), "` from the front of `src`.")]
            pub fn $get(src: &[u8]) -> $ty {
                const LEN: usize = core::mem::size_of::<$ty>();
                let mut raw = [0u8; LEN];
                match src.get(..LEN) {
                    Some(head) => raw.copy_from_slice(head),
                    None => panic!(
                        concat!(stringify!($ty), " source shorter than {} bytes (have {})"),
                        LEN,
                        src.len()
                    ),
                }
                <$ty>::from_be_bytes(raw)
            }
        };
    }

    be_codec!(put_u16_be, get_u16_be, u16);
    be_codec!(put_u32_be, get_u32_be, u32);
    be_codec!(put_u64_be, get_u64_be, u64);

    /// Stores a signed value as raw two's complement; values are never compared as bytes.
    pub fn put_i64_raw(dst: &mut [u8], v: i64) {
        put_u64_be(dst, v as u64);
    }

    /// Decodes a value written by [`put_i64_raw`].
    pub fn get_i64_raw(src: &[u8]) -> i64 {
        get_u64_be(src) as i64
    }
}
