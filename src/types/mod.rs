// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod container_name;
mod id;
mod identifier;
mod image_ref;

pub use container_name::{ContainerName, ContainerNameError};
pub use id::{ContainerId, Id, ImageId, SHORT_ID_LEN, random_hex_id};
pub use identifier::{Identifier, IdentifierError, MAX_IDENTIFIER_LEN, validate_identifier};
pub use image_ref::{ImageRef, ParseImageRefError};
