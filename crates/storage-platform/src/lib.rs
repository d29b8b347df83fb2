// Contracts of the OS storage collaborators

pub mod documents;
pub mod grants;
pub mod media;
