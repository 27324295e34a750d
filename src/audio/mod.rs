pub mod container;
pub mod file;

pub use container::{
    assemble_container, embedded_header_len, encode_header, frame_layout, parse_embedded_header,
    patch_header,
    AssembledContainer, ContainerWriter, WAV_HEADER_LEN,
};
pub use file::AudioFile;
