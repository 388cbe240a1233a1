pub mod decision;
pub mod notification;
pub mod photo_moderation;
pub mod queue;
pub mod review;
pub mod sweep;
pub mod text_moderation;
