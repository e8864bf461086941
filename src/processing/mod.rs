pub mod color;
pub mod compose;
pub mod decode;
pub mod font;
pub mod layout;
pub mod overlay;
