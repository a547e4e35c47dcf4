//! rtbatch CLI - write demo scenes, inspect blobs and render batches.

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use rtbatch::format::{SceneBlobWriter, SceneDescription, SceneLoadData};
use rtbatch::prelude::*;

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut default_filter = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => default_filter = "debug",
            "-vv" | "--trace" => default_filter = "trace",
            "-q" | "--quiet" => default_filter = "warn",
            _ => filtered_args.push(arg),
        }
    }
    rtbatch::logging::init_with_default(default_filter);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "demo" | "d" => match filtered_args.get(1) {
            Some(out) => cmd_demo(out),
            None => usage("rtbatch demo <out.bin>"),
        },
        "info" | "i" => match filtered_args.get(1) {
            Some(file) => cmd_info(file),
            None => usage("rtbatch info <scene.bin>"),
        },
        "render" | "r" => {
            if filtered_args.len() < 3 {
                usage("rtbatch render <scene.bin> <out.png> [--batch N] [--size WxH] [--host] [--config FILE]")
            } else {
                cmd_render(filtered_args[1], filtered_args[2], &filtered_args[3..])
            }
        }
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn usage(text: &str) -> anyhow::Result<()> {
    bail!("missing arguments\nUsage: {text}")
}

fn print_help() {
    println!("rtbatch - batched ray-tracing toolkit");
    println!();
    println!("USAGE:");
    println!("    rtbatch [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    d, demo   <out.bin>                 Write a small demo scene blob");
    println!("    i, info   <scene.bin>               Show header and section statistics");
    println!("    r, render <scene.bin> <out.png>     Render one batch into a PNG strip");
    println!("        --batch N        environments per batch (default 4)");
    println!("        --size WxH       image size per environment (default 128x128)");
    println!("        --host           use the CPU reference backend");
    println!("        --config FILE    JSON render configuration");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose   Debug logging");
    println!("    -vv, --trace    Trace logging");
    println!("    -q, --quiet     Warnings only");
    println!();
    println!("RTBATCH_LOG overrides the log filter (e.g. RTBATCH_LOG=rtbatch=debug).");
}

fn cmd_demo(out: &str) -> anyhow::Result<()> {
    let desc = SceneDescription::demo();
    SceneBlobWriter::write(out, &desc).with_context(|| format!("writing {out}"))?;
    println!("Wrote demo scene to {out}");
    Ok(())
}

fn cmd_info(file: &str) -> anyhow::Result<()> {
    let data = SceneLoadData::open(file).with_context(|| format!("opening {file}"))?;
    let h = &data.header;
    println!("Scene: {file}");
    println!("  vertices:   {}", h.num_vertices);
    println!("  triangles:  {}", h.num_indices / 3);
    println!("  meshes:     {}", h.num_meshes);
    println!("  objects:    {}", h.num_objects);
    println!("  materials:  {}", h.num_materials);
    println!("  lights:     {}", data.lights.len());
    println!("  instances:  {}", data.instances.len());
    println!("  payload:    {} bytes (indices @ {}, materials @ {})", h.total_bytes, h.index_offset, h.material_offset);
    for (object, info) in data.objects.iter().enumerate() {
        let tris: u32 = data.object_meshes(object).iter().map(|m| m.num_triangles).sum();
        println!("  object {object}: {} meshes, {tris} triangles", info.num_meshes);
    }
    let named: usize = data.textures.names.iter().map(Vec::len).sum();
    if named > 0 {
        println!("  textures:   {named} names");
    }
    Ok(())
}

fn parse_size(text: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = text.split_once(['x', 'X']).context("size must be WxH")?;
    Ok((w.parse()?, h.parse()?))
}

fn cmd_render(scene_path: &str, out: &str, opts: &[&str]) -> anyhow::Result<()> {
    let mut config = RenderConfig { batch_size: 4, image_width: 128, image_height: 128, ..Default::default() };
    let mut it = opts.iter();
    while let Some(&opt) = it.next() {
        match opt {
            "--batch" | "-b" => config.batch_size = it.next().context("--batch needs a value")?.parse()?,
            "--size" | "-s" => {
                let (w, h) = parse_size(it.next().context("--size needs a value")?)?;
                config.image_width = w;
                config.image_height = h;
            }
            "--host" => config.backend = BackendKind::Host,
            "--config" | "-c" => {
                let path = it.next().context("--config needs a value")?;
                config = RenderConfig::load(path).with_context(|| format!("loading {path}"))?;
            }
            other => bail!("unknown render option: {other}"),
        }
    }

    let mut renderer = Renderer::new(config.clone())?;
    let scene = renderer.make_loader().load_scene(Path::new(scene_path))?;

    // orbit the cameras around the origin, one angle per environment
    let aspect = config.image_width as f32 / config.image_height as f32;
    let mut envs = Vec::with_capacity(config.batch_size as usize);
    for i in 0..config.batch_size {
        let angle = i as f32 / config.batch_size as f32 * std::f32::consts::TAU;
        let eye = Vec3::new(8.0 * angle.sin(), 4.0, -8.0 * angle.cos());
        let camera = Camera::look_at(eye, Vec3::ZERO, Vec3::Y, 45.0, aspect);
        envs.push(renderer.make_environment_with_camera(&scene, camera)?);
    }

    let start = std::time::Instant::now();
    let mut batch: Vec<&mut Environment> = envs.iter_mut().collect();
    renderer.render(&mut batch)?;
    let elapsed = start.elapsed();
    let frame = renderer.frame()?;
    frame.to_strip().save(out).with_context(|| format!("writing {out}"))?;
    println!(
        "Rendered {} x {}x{} on {} in {:.2} ms -> {out}",
        config.batch_size,
        config.image_width,
        config.image_height,
        renderer.backend_kind(),
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}
