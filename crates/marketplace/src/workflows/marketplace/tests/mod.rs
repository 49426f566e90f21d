mod common;
mod engagements;
