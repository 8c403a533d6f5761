use prost::Message;
use std::env::var;
use std::io::Result;
use std::path::PathBuf;

fn main() -> Result<()> {
    // List of proto files containing a message definition
    let proto_files = &["echo.proto"];

    // Name of the folder containing the proto definitions
    let proto_folder = "proto";

    // Compiled in-process so that no `protoc` binary is needed.
    let fds = protox::compile(proto_files, [proto_folder]).map_err(std::io::Error::other)?;

    let out_dir = PathBuf::from(var("OUT_DIR").map_err(std::io::Error::other)?);
    std::fs::write(out_dir.join("descriptors.bin"), fds.encode_to_vec())?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(fds)?;

    println!("cargo:rerun-if-changed={proto_folder}");
    Ok(())
}
