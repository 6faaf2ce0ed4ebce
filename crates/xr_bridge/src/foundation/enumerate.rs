//! Two-call enumeration
//!
//! Callers first probe with an empty buffer to learn the element count, then
//! call again with a buffer of at least that size.

use crate::core::error::{XrError, XrResult};

/// Fill `output` from `items` following the two-call idiom
///
/// Returns the number of elements available. An empty `output` is a size
/// probe; a non-empty buffer smaller than `items` fails with
/// [`XrError::SizeInsufficient`] and is left untouched.
pub fn enumerate_two_call<T: Clone>(items: &[T], output: &mut [T]) -> XrResult<usize> {
    let count = items.len();
    if output.is_empty() {
        return Ok(count);
    }
    if output.len() < count {
        return Err(XrError::SizeInsufficient { required: count, capacity: output.len() });
    }
    output[..count].clone_from_slice(items);
    Ok(count)
}

/// Two-call enumeration of a string as a NUL-terminated byte buffer
pub fn enumerate_string(value: &str, output: &mut [u8]) -> XrResult<usize> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    enumerate_two_call(&bytes, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_returns_count() {
        let items = [1, 2, 3];
        assert_eq!(enumerate_two_call(&items, &mut []).unwrap(), 3);
    }

    #[test]
    fn test_insufficient_capacity() {
        let items = [1, 2, 3];
        let mut out = [0; 2];
        match enumerate_two_call(&items, &mut out) {
            Err(XrError::SizeInsufficient { required, capacity }) => {
                assert_eq!(required, 3);
                assert_eq!(capacity, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn test_exact_and_larger_buffers() {
        let items = [7, 8];
        let mut exact = [0; 2];
        assert_eq!(enumerate_two_call(&items, &mut exact).unwrap(), 2);
        assert_eq!(exact, [7, 8]);

        let mut larger = [0; 4];
        assert_eq!(enumerate_two_call(&items, &mut larger).unwrap(), 2);
        assert_eq!(larger, [7, 8, 0, 0]);
    }

    #[test]
    fn test_empty_source() {
        let items: [u8; 0] = [];
        assert_eq!(enumerate_two_call(&items, &mut []).unwrap(), 0);
        assert_eq!(enumerate_two_call(&items, &mut [0; 3]).unwrap(), 0);
    }

    #[test]
    fn test_string_counts_terminator() {
        assert_eq!(enumerate_string("/user", &mut []).unwrap(), 6);
        let mut buf = [0xffu8; 6];
        enumerate_string("/user", &mut buf).unwrap();
        assert_eq!(&buf, b"/user\0");
    }
}
