//! modbus_link demo
//!
//! Starts a Modbus TCP slave on loopback (or talks to the given server) and
//! runs every supported function code against it with console logging.
//!
//! Usage: cargo run --bin demo [server_address]
//! Example: cargo run --bin demo 127.0.0.1:502

use std::sync::Arc;
use std::time::Duration;

use modbus_link::{
    AsyncModbusClient, CallbackLogger, DataStore, ModbusClient, ModbusError, ModbusTcpServer,
    ServerHandle, TcpConfig, TcpServerConfig, TcpTransport,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("modbus_link v{} demo", modbus_link::VERSION);
    println!("======================\n");

    let (address, server) = match std::env::args().nth(1) {
        Some(address) => (address, None),
        None => {
            let store = Arc::new(DataStore::new());
            store.write_input_registers(0, &[230, 231, 229])?;
            store.write_discrete_inputs(0, &[true, false, true, true])?;

            let server =
                ModbusTcpServer::bind(TcpServerConfig::new("127.0.0.1:0"), store).await?;
            let address = server.local_addr().to_string();
            println!("Started local slave on {}\n", address);
            (address, Some(server.spawn()))
        }
    };

    let config = TcpConfig::new(address).with_timeout(Duration::from_secs(2));
    let transport = TcpTransport::with_logger(config, CallbackLogger::console());
    let client = AsyncModbusClient::with_logger(transport, CallbackLogger::console());
    client.connect().await?;

    println!("Write single register (0x06)");
    client.write_single_register(1, 0, 0x1234).await?;

    println!("Write multiple registers (0x10)");
    client.write_multiple_registers(1, 1, &[10, 20, 30]).await?;

    println!("Read holding registers (0x03)");
    let registers = client.read_holding_registers(1, 0, 4).await?;
    println!("  -> {:04X?}", registers);

    println!("Read input registers (0x04)");
    let inputs = client.read_input_registers(1, 0, 3).await?;
    println!("  -> {:?}", inputs);

    println!("Write single coil (0x05)");
    client.write_single_coil(1, 0, true).await?;

    println!("Write multiple coils (0x0F)");
    client
        .write_multiple_coils(1, 1, &[false, true, true, false, true])
        .await?;

    println!("Read coils (0x01)");
    let coils = client.read_coils(1, 0, 6).await?;
    println!("  -> {:?}", coils);

    println!("Read discrete inputs (0x02)");
    let discrete = client.read_discrete_inputs(1, 0, 4).await?;
    println!("  -> {:?}", discrete);

    println!("Read past the end of the table");
    match client.read_holding_registers(1, 65535, 2).await {
        Err(ModbusError::InvalidData { message }) => println!("  -> rejected locally: {}", message),
        other => println!("  -> {:?}", other),
    }

    let stats = client.get_stats();
    println!(
        "\nTransport: {} requests, {} responses, {} errors, {} bytes out, {} bytes in",
        stats.requests_sent,
        stats.responses_received,
        stats.errors,
        stats.bytes_sent,
        stats.bytes_received
    );

    client.disconnect().await?;
    if let Some(server) = server {
        stop(server).await?;
    }
    Ok(())
}

async fn stop(server: ServerHandle) -> Result<(), Box<dyn std::error::Error>> {
    let stats = server.stats();
    println!(
        "Slave: {} connections, {} requests, {} exceptions",
        stats.connections, stats.requests, stats.exceptions
    );
    server.shutdown().await?;
    Ok(())
}
