tonic::include_proto!("face_match");

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("face_match");
