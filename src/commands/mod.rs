pub mod info;
pub mod render;

pub use info::show_info;
pub use render::render_figure;
