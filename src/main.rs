//! Strix - Multi-Process Web Browser Engine Core
//!
//! Demo entry point: runs a browser context against an in-process
//! renderer and walks a page through loads, script, history, and a crash.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use strix::renderer::DefaultPageEngine;
use strix::{
    BrowserContext, CallbackResult, InProcessLauncher, PageClient, PageProxy, NAME, VERSION,
};

struct ConsoleClient {
    events: mpsc::Sender<&'static str>,
}

impl PageClient for ConsoleClient {
    fn did_start_provisional_load(&mut self, _page: &PageProxy, _frame_id: u64, url: &str) {
        println!("   → loading {url}");
    }

    fn did_receive_title(&mut self, _page: &PageProxy, title: &str) {
        println!("   → title: {title:?}");
    }

    fn did_finish_load(&mut self, _page: &PageProxy, _frame_id: u64) {
        let _ = self.events.send("finished");
    }

    fn did_fail_load(
        &mut self,
        _page: &PageProxy,
        _frame_id: u64,
        error: &strix::messages::LoadError,
    ) {
        println!("   → load failed: {} ({})", error.description, error.code);
        let _ = self.events.send("failed");
    }

    fn process_did_exit(&mut self, _page: &PageProxy) {
        println!("   → renderer exited; page state reset");
    }
}

fn wait(events: &mpsc::Receiver<&'static str>) {
    events
        .recv_timeout(Duration::from_secs(5))
        .expect("load did not settle");
}

fn main() {
    env_logger::init();

    println!("🦉 {NAME} v{VERSION} - Multi-Process Web Browser Engine Core");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let launcher = Arc::new(InProcessLauncher::new(|| {
        Box::new(DefaultPageEngine::new())
    }));
    let context = BrowserContext::new(launcher);
    let page = context.create_page(800, 600);
    println!("✅ Renderer process launched, page {} created", page.page_id());

    let (tx, events) = mpsc::channel();
    page.set_client(Box::new(ConsoleClient { events: tx }));

    println!("\n📄 Loading pages:");
    page.load_url("https://example.test/").unwrap();
    wait(&events);
    page.load_url("https://docs.example.test/guide").unwrap();
    wait(&events);

    println!("\n🕑 History: back {} / forward {}",
        page.back_list(usize::MAX).len(),
        page.forward_list(usize::MAX).len(),
    );
    page.go_back();
    wait(&events);
    println!("   back on {}", page.url().unwrap_or_default());

    println!("\n🧪 Script:");
    let (script_tx, script_rx) = mpsc::channel();
    page.run_javascript("document.title", move |result| {
        let _ = script_tx.send(result);
    });
    match script_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(CallbackResult::Value(value)) => println!("   result: {value}"),
        Ok(other) => println!("   no result: {other:?}"),
        Err(_) => println!("   renderer never answered"),
    }

    println!("\n💥 Simulating a renderer crash:");
    context.terminate_process();
    println!("   history still navigable: {} entries", page.back_list(usize::MAX).len() + 1);

    page.load_url("https://example.test/recovered").unwrap();
    wait(&events);
    println!("   ✅ page revived on {}", page.url().unwrap_or_default());

    page.close();
    println!("\n👋 Done");
}
