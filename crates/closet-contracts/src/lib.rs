pub mod analysis;
pub mod events;
pub mod shopping;
pub mod wardrobe;
