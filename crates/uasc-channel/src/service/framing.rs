//! Frame protection: padding, signature and encryption.
//!
//! Outgoing frames are padded so that body plus signature fills whole
//! plaintext blocks, the size field is patched, the complete frame is signed
//! and everything after the security header is encrypted. Incoming frames
//! go through the same steps in reverse.

use crate::codec::{MessageType, SEQUENCE_HEADER_LENGTH};
use crate::domain::{ChannelError, CodecError, MessageSecurityMode};
use bytes::{BufMut, BytesMut};
use uasc_crypto::SecurityAlgorithm;

/// Offset of the size field within the message header.
const SIZE_OFFSET: usize = 4;
/// Ciphertext blocks above this size carry a second padding size byte.
pub(crate) const EXTRA_PADDING_THRESHOLD: usize = 256;

/// Protection applied to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Protection {
    pub sign: bool,
    pub encrypt: bool,
}

impl Protection {
    /// Neither signed nor encrypted.
    #[cfg(test)]
    pub const NONE: Self = Self {
        sign: false,
        encrypt: false,
    };

    /// `OPN` frames are always signed and encrypted unless the policy is
    /// None. `MSG` and `CLO` follow the security mode.
    pub fn for_frame(
        message_type: MessageType,
        policy_none: bool,
        mode: MessageSecurityMode,
    ) -> Self {
        if message_type.is_asymmetric() {
            Self {
                sign: !policy_none,
                encrypt: !policy_none,
            }
        } else {
            Self {
                sign: mode.signs(),
                encrypt: mode.encrypts(),
            }
        }
    }
}

fn patch_size(frame: &mut [u8], size: usize) {
    let size = u32::try_from(size).unwrap_or(u32::MAX);
    frame[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
}

/// Secure a plain frame. `header_length` covers message and security
/// header; the sequence header and body follow.
pub(crate) fn sign_and_encrypt(
    mut frame: BytesMut,
    header_length: usize,
    algorithm: &SecurityAlgorithm,
    protection: Protection,
) -> Result<BytesMut, ChannelError> {
    if !protection.sign && !protection.encrypt {
        let len = frame.len();
        patch_size(&mut frame, len);
        return Ok(frame);
    }

    let signature_length = if protection.sign {
        algorithm.signature_length()
    } else {
        0
    };

    let encrypted_length = if protection.encrypt {
        let plain_block = algorithm.plaintext_block_size();
        let cipher_block = algorithm.block_size();
        let extra = cipher_block > EXTRA_PADDING_THRESHOLD;
        let overhead = if extra { 2 } else { 1 };

        let unpadded = frame.len() - header_length + signature_length + overhead;
        let padding = (plain_block - unpadded % plain_block) % plain_block;
        for _ in 0..=padding {
            frame.put_u8((padding & 0xFF) as u8);
        }
        if extra {
            frame.put_u8((padding >> 8) as u8);
        }

        let plain_length = frame.len() - header_length + signature_length;
        (plain_length / plain_block) * cipher_block
    } else {
        frame.len() - header_length + signature_length
    };

    patch_size(&mut frame, header_length + encrypted_length);

    if protection.sign {
        let signature = algorithm.sign(&frame)?;
        frame.put_slice(&signature);
    }

    if protection.encrypt {
        let ciphertext = algorithm.encrypt(&frame[header_length..])?;
        if ciphertext.len() != encrypted_length {
            tracing::debug!(
                expected = encrypted_length,
                actual = ciphertext.len(),
                "Ciphertext length does not match the size field"
            );
            return Err(ChannelError::SecurityChecksFailed);
        }
        frame.truncate(header_length);
        frame.put_slice(&ciphertext);
    }

    Ok(frame)
}

/// Verify and decrypt a received frame. Returns the sequence header and
/// body with signature and padding removed.
pub(crate) fn verify_and_decrypt(
    frame: &[u8],
    header_length: usize,
    algorithm: &SecurityAlgorithm,
    protection: Protection,
) -> Result<Vec<u8>, ChannelError> {
    let mut body = if protection.encrypt {
        algorithm.decrypt(&frame[header_length..])?
    } else {
        frame[header_length..].to_vec()
    };

    if protection.sign {
        let signature_length = algorithm.remote_signature_length();
        if body.len() < signature_length + SEQUENCE_HEADER_LENGTH {
            return Err(ChannelError::SecurityChecksFailed);
        }
        let split = body.len() - signature_length;

        let mut signed = Vec::with_capacity(header_length + split);
        signed.extend_from_slice(&frame[..header_length]);
        signed.extend_from_slice(&body[..split]);
        algorithm.verify_signature(&signed, &body[split..])?;
        body.truncate(split);
    }

    if protection.encrypt {
        let extra = algorithm.remote_block_size() > EXTRA_PADDING_THRESHOLD;
        let padding = strip_padding(&body, extra)?;
        body.truncate(body.len() - padding);
    }

    if body.len() < SEQUENCE_HEADER_LENGTH {
        return Err(CodecError::Truncated {
            needed: SEQUENCE_HEADER_LENGTH,
            remaining: body.len(),
        }
        .into());
    }
    Ok(body)
}

/// Number of trailing padding bytes, including the size bytes.
fn strip_padding(body: &[u8], extra: bool) -> Result<usize, ChannelError> {
    let len = body.len();
    let (padding, size_bytes) = match (extra, len) {
        (false, 1..) => (usize::from(body[len - 1]), 1),
        (true, 2..) => (
            usize::from(body[len - 2]) | (usize::from(body[len - 1]) << 8),
            2,
        ),
        _ => return Err(CodecError::InvalidPadding.into()),
    };

    let total = padding + size_bytes;
    if total > len.saturating_sub(SEQUENCE_HEADER_LENGTH) {
        return Err(CodecError::InvalidPadding.into());
    }
    let low = (padding & 0xFF) as u8;
    let fill = &body[len - total..len - size_bytes + 1];
    if fill.iter().any(|&b| b != low) {
        return Err(CodecError::InvalidPadding.into());
    }
    Ok(total)
}
