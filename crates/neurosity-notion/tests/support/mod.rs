pub mod mock_device;
pub mod mock_transport;
