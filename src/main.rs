use anyhow::{bail, Context, Result};
use std::env;

use pos_backoffice::{
    init_logging, insert_branch, insert_employee, insert_expense, insert_product, insert_sale,
    list_registers, low_stock_products, open_shifts, shift_totals, Actor, AppConfig,
    RegisterShiftGuard, Role, SqliteStore, GuardError,
};

const USAGE: &str = "Usage: pos-backoffice <command>

Commands:
  init                                 Create the database schema
  seed                                 Insert demo branches, employees and products
  open-register <branch_id> [location] Open a register (and its first shift)
  close-register <register_id>         Close a register and its open shift
  reopen-register <register_id>        Reopen a closed register
  open-shift <register_id> [employee]  Open a shift on a register
  close-shift <shift_id> [--compute-totals]
  status                               Show registers and open shifts
  low-stock [threshold]                Products running out";

fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_logging(&config);

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let store = SqliteStore::open(&config.db_path, config.busy_timeout)?;
    let guard = RegisterShiftGuard::new(store).with_retry(config.retry);
    let actor = Actor::system();

    match command.as_str() {
        "init" => {
            println!("✓ Database ready at {}", config.db_path.display());
        }
        "seed" => run_seed(&guard)?,
        "open-register" => {
            let branch_id = parse_id(&args, 1, "branch_id")?;
            let location = args.get(2).map(String::as_str).unwrap_or("");
            let opened = report(guard.open_register(&actor, branch_id, location))?;
            println!(
                "✓ Register {} open at branch {} (shift {})",
                opened.register.id, opened.register.branch_id, opened.shift.id
            );
        }
        "close-register" => {
            let register_id = parse_id(&args, 1, "register_id")?;
            let closed = report(guard.close_register(&actor, register_id))?;
            match closed.closed_shift {
                Some(shift) => println!(
                    "✓ Register {} closed, shift {} closed at {}",
                    register_id, shift.id, closed.closed_at
                ),
                None => println!("✓ Register {} closed", register_id),
            }
        }
        "reopen-register" => {
            let register_id = parse_id(&args, 1, "register_id")?;
            let opened = report(guard.reopen_register(&actor, register_id))?;
            println!(
                "✓ Register {} open (shift {}{})",
                opened.register.id,
                opened.shift.id,
                if opened.shift_created { ", new" } else { "" }
            );
        }
        "open-shift" => {
            let register_id = parse_id(&args, 1, "register_id")?;
            let employee_id = match args.get(2) {
                Some(_) => Some(parse_id(&args, 2, "employee_id")?),
                None => None,
            };
            let shift = report(guard.open_shift(&actor, register_id, employee_id, None))?;
            println!("✓ Shift {} open on register {}", shift.id, register_id);
        }
        "close-shift" => {
            let shift_id = parse_id(&args, 1, "shift_id")?;
            let totals = if args.iter().any(|a| a == "--compute-totals") {
                Some(report(shift_totals(guard.store().connection(), shift_id))?)
            } else {
                None
            };
            let shift = report(guard.close_shift(&actor, shift_id, totals))?;
            println!("✓ Shift {} closed", shift.id);
            if let Some(totals) = shift.totals {
                println!(
                    "  in: {}  out: {}  balance: {}",
                    cents(totals.inflows),
                    cents(totals.outflows),
                    cents(totals.balance)
                );
            }
        }
        "status" => run_status(&guard)?,
        "low-stock" => {
            let threshold: i64 = match args.get(1) {
                Some(value) => value.parse().context("threshold must be a number")?,
                None => config.low_stock_threshold,
            };
            let products = low_stock_products(guard.store().connection(), threshold)?;
            println!("📦 {} products at or below {} units", products.len(), threshold);
            for product in products {
                println!("  {:>4}  {} ({})", product.stock, product.name, cents(product.price));
            }
        }
        other => {
            eprintln!("❌ Unknown command: {}", other);
            println!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_id(args: &[String], index: usize, name: &str) -> Result<i64> {
    let raw = args
        .get(index)
        .with_context(|| format!("missing <{}>", name))?;
    raw.parse()
        .with_context(|| format!("<{}> must be a number, got {}", name, raw))
}

/// Turn guard rejections into a readable line instead of an error chain
fn report<T>(result: Result<T, GuardError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err @ GuardError::Database(_)) => Err(err.into()),
        Err(err) => bail!("{} ({})", err, err.kind()),
    }
}

fn cents(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, amount.abs() / 100, amount.abs() % 100)
}

fn run_seed(guard: &RegisterShiftGuard<SqliteStore>) -> Result<()> {
    let conn = guard.store().connection();

    let north = insert_branch(conn, "North", Some("Zona norte"))?;
    let west = insert_branch(conn, "West", Some("Zona oeste"))?;
    let admin = insert_employee(conn, "Laura", "Díaz", "laura@example.com", Role::Administrator)?;
    let seller = insert_employee(conn, "Tomás", "Pérez", "tomas@example.com", Role::Seller)?;

    for (name, price, stock) in [
        ("Yerba 1kg", 4_500, 3),
        ("Azúcar 1kg", 1_200, 0),
        ("Harina 000", 900, 40),
        ("Aceite 900ml", 2_800, 6),
    ] {
        insert_product(conn, name, None, price, stock)?;
    }

    let opened = guard.open_register(&admin.as_actor(), north.id, "front desk")?;
    insert_sale(conn, opened.shift.id, Some("Walk-in"), 5_700)?;
    insert_expense(conn, opened.shift.id, 1_000, Some("change float"))?;

    println!("🌱 Seeded branches {} and {}", north.id, west.id);
    println!("✓ Employees: {} (admin), {} (seller)", admin.full_name(), seller.full_name());
    println!(
        "✓ Register {} open at {} with shift {}",
        opened.register.id,
        north.display_name(),
        opened.shift.id
    );
    Ok(())
}

fn run_status(guard: &RegisterShiftGuard<SqliteStore>) -> Result<()> {
    let conn = guard.store().connection();

    let registers = list_registers(conn, None)?;
    println!("🧾 Registers ({})", registers.len());
    for register in &registers {
        println!(
            "  #{:<4} branch {:<4} {:<7} {}",
            register.id,
            register.branch_id,
            register.status.as_str(),
            register.location.as_deref().unwrap_or("-")
        );
    }

    let shifts = open_shifts(conn)?;
    println!("\n⏱️  Open shifts ({})", shifts.len());
    for shift in shifts {
        println!(
            "  #{:<4} register {:<4} since {}",
            shift.id, shift.register_id, shift.opened_at
        );
    }
    Ok(())
}
