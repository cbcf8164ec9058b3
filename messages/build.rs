fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_path = "proto/messages.proto";
    println!("cargo:rerun-if-changed={proto_path}");

    let file_descriptor_set = protox::compile([proto_path], ["proto"])?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(file_descriptor_set)?;

    Ok(())
}
