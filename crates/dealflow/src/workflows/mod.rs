pub mod acquisitions;
