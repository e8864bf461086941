/// Out-of-band requests delivered to the rotation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationCommand {
    /// Reorder today's candidates and show the first one now.
    Shuffle,
}
