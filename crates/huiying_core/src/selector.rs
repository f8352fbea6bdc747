use rand::seq::SliceRandom;
use rand::Rng;

/// Pick one reply uniformly at random.
pub fn select_reply(replies: &[String]) -> String {
    select_reply_with(replies, &mut rand::thread_rng())
}

/// Like [`select_reply`] with a caller-supplied RNG.
/// An empty slice yields an empty string.
pub fn select_reply_with<R: Rng + ?Sized>(replies: &[String], rng: &mut R) -> String {
    replies.choose(rng).cloned().unwrap_or_default()
}
