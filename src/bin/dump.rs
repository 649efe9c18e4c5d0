//! Pipeline-stage dumper and image renderer for `sdfjit`, the direct
//! analog of `original_source/src/main.cpp`; CLI shape grounded on
//! `wasmtime`'s `clap::Parser` derive + `env_logger::try_init` usage
//! (`tests/disas.rs` in the teacher workspace).

use clap::{Parser, Subcommand};
use sdfjit::ast::{Ast, IN_X, IN_Y, IN_Z};
use sdfjit::bytecode::Bytecode;
use sdfjit::machcode;
use sdfjit::raymarch::{CompileOptions, Raymarcher};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sdfjit-dump", about = "Dump sdfjit's compilation pipeline or render a scene")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Build the demo scene and print every pipeline stage (default).
    Dump,
    /// Raymarch the demo scene to a PPM image.
    Render {
        /// Output image width, in pixels.
        #[arg(long, default_value_t = 512)]
        width: usize,
        /// Output image height, in pixels.
        #[arg(long, default_value_t = 512)]
        height: usize,
        /// Camera position.
        #[arg(long, default_value_t = 0.0)]
        x: f32,
        #[arg(long, default_value_t = 0.0)]
        y: f32,
        #[arg(long, default_value_t = -200.0)]
        z: f32,
        /// Where to write the PPM file.
        #[arg(long, default_value = "sdfjit.ppm")]
        out: PathBuf,
    },
}

/// The same box/sphere/box union scene `original_source/src/main.cpp`
/// builds, used as the pipeline dump's example and the render demo.
fn demo_scene() -> Ast {
    let mut ast = Ast::new();
    let pos = ast.pos3(IN_X, IN_Y, IN_Z);

    let translated = ast.translate(pos, 30.0, 30.0, 30.0);
    let box1 = ast.box_(pos, 10.0, 20.0, 30.0);
    let sphere1 = ast.sphere(translated, 6.0);
    let merged = ast.add(box1, sphere1);

    let far_corner = ast.translate(pos, -60.0, -60.0, -60.0);
    let box2 = ast.box_(far_corner, 20.0, 20.0, 20.0);
    ast.add(merged, box2);

    ast
}

fn main() -> sdfjit::Result<()> {
    env_logger::try_init().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Dump) {
        Command::Dump => dump(),
        Command::Render { width, height, x, y, z, out } => render(width, height, x, y, z, &out),
    }
}

fn dump() -> sdfjit::Result<()> {
    let mut ast = demo_scene();

    println!("AST (sexpr):");
    println!("{}", ast.dump_sexpr());
    println!("=====================");

    sdfjit::ast::combine_identical_nodes(&mut ast);
    println!("AST (linearized, after CSE pass):");
    println!("{}", ast.dump());
    println!("=====================");

    let mut bc = Bytecode::from_ast(&ast)?;
    println!("Bytecode (before optimization):");
    println!("{}", bc.dump());
    println!("=====================");

    sdfjit::bytecode::optimize(&mut bc);
    println!("Bytecode (after optimization):");
    println!("{}", bc.dump());
    println!("=====================");

    let mc = machcode::lower::lower(&bc);
    println!("Machine Code (resolved, allocated, framed):");
    println!("{}", mc.dump());
    println!("Constant Pool:");
    println!("{}", mc.constants.dump());
    println!("=====================");

    let program = machcode::encoder::encode(&mc)?;
    println!("Assembled instructions ({} bytes):", program.code.len());
    println!("{}", program.disassemble(&mc));
    println!("Hexdump of that:");
    println!("{program}");
    println!("=====================");

    Ok(())
}

fn render(width: usize, height: usize, x: f32, y: f32, z: f32, out: &PathBuf) -> sdfjit::Result<()> {
    let mut ast = demo_scene();
    let rt = Raymarcher::compile(&mut ast, CompileOptions::default())?;
    let pixels = rt.trace_image(x, y, z, 0.0, 0.0, 0.0, width, height);

    let file = std::fs::File::create(out)?;
    let mut writer = std::io::BufWriter::new(file);
    writeln!(writer, "P6\n{width} {height}\n255")?;
    for pixel in &pixels {
        writer.write_all(pixel)?;
    }
    writer.flush()?;

    log::info!("wrote {width}x{height} image to {}", out.display());
    Ok(())
}
