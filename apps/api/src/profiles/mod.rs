// Role-specific profiles. Job seekers and recruiters each have one row,
// created at registration.

pub mod handlers;
