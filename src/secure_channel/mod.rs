/*!
 * Secure channel
 *
 * Hybrid-encryption envelopes between clients and the server, with a
 * replay window enforced before decryption, a per-principal session key
 * cache and a signed challenge/response primitive.
 */

mod challenge;
mod channel;
mod envelope;
mod session;

#[cfg(test)]
mod tests;

pub use challenge::Challenge;
pub use channel::{Handshake, SecureChannel, SweepReport};
pub use envelope::{open, seal, Envelope, EnvelopeAlgorithm, ENVELOPE_VERSION};
pub use session::SessionInfo;
