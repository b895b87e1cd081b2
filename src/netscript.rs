use std::sync::Mutex;

use js_sys::JsString;
use wasm_bindgen::{
    prelude::*,
    JsValue,
};

// thank you github.com/paulcdejean
#[wasm_bindgen]
extern "C" {
    pub type NS;

    #[wasm_bindgen(method)]
    fn tprint(
        this: &NS,
        print: &str,
    );

    #[wasm_bindgen(method)]
    fn print(
        this: &NS,
        print: &str,
    );

    #[wasm_bindgen(method)]
    async fn sleep(
        this: &NS,
        millis: i32,
    );

    #[wasm_bindgen(method)]
    fn disableLog(
        this: &NS,
        function: &str,
    );

    #[wasm_bindgen(method)]
    fn getHostname(this: &NS) -> JsValue;

    #[wasm_bindgen(method)]
    fn scan(
        this: &NS,
        scan: Option<&str>,
    ) -> Vec<JsValue>;

    #[wasm_bindgen(catch, method, variadic)]
    fn exec(
        this: &NS,
        script_name: &str,
        host: &str,
        num_threads: Option<i32>,
        args: Box<[JsString]>,
    ) -> Result<i32, JsValue>;

    #[wasm_bindgen(method)]
    fn killall(
        this: &NS,
        host: &str,
        safetyguard: bool,
    ) -> bool;

    #[wasm_bindgen(catch, method)]
    fn nuke(
        this: &NS,
        host: &str,
    ) -> Result<bool, JsValue>;

    #[wasm_bindgen(catch, method)]
    fn brutessh(
        this: &NS,
        hostname: &str,
    ) -> Result<bool, JsValue>;

    #[wasm_bindgen(catch, method)]
    fn ftpcrack(
        this: &NS,
        hostname: &str,
    ) -> Result<bool, JsValue>;

    #[wasm_bindgen(catch, method)]
    fn relaysmtp(
        this: &NS,
        hostname: &str,
    ) -> Result<bool, JsValue>;

    #[wasm_bindgen(catch, method)]
    fn httpworm(
        this: &NS,
        hostname: &str,
    ) -> Result<bool, JsValue>;

    #[wasm_bindgen(catch, method)]
    fn sqlinject(
        this: &NS,
        hostname: &str,
    ) -> Result<bool, JsValue>;

    #[wasm_bindgen(method)]
    fn getServer(
        this: &NS,
        host: Option<&str>,
    ) -> Server;

    #[wasm_bindgen(method)]
    fn getPlayer(this: &NS) -> Player;

    #[wasm_bindgen(method)]
    fn getHackingLevel(this: &NS) -> i32;

    #[wasm_bindgen(method)]
    fn getServerMoneyAvailable(
        this: &NS,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn getHackTime(
        this: &NS,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn getGrowTime(
        this: &NS,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn getWeakenTime(
        this: &NS,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn hackAnalyzeChance(
        this: &NS,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn hackAnalyzeThreads(
        this: &NS,
        host: &str,
        amount: f64,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn hackAnalyzeSecurity(
        this: &NS,
        threads: i32,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn growthAnalyze(
        this: &NS,
        host: &str,
        growth_factor: f64,
        cores: Option<i32>,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn growthAnalyzeSecurity(
        this: &NS,
        threads: i32,
        host: &str,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn weakenAnalyze(
        this: &NS,
        threads: i32,
    ) -> f64;

    #[wasm_bindgen(method)]
    fn read(
        this: &NS,
        filename: &str,
    ) -> JsValue;

    #[wasm_bindgen(method)]
    fn write(
        this: &NS,
        filename: &str,
        data: &str,
        mode: &str,
    );

    #[wasm_bindgen(method)]
    fn scp(
        this: &NS,
        file: &str,
        destination: &str,
        source: &str,
    ) -> bool;

    #[wasm_bindgen(method)]
    fn fileExists(
        this: &NS,
        file: &str,
        host: &str,
    ) -> bool;

    #[wasm_bindgen(method, getter)]
    fn formulas(this: &NS) -> Formulas;

    pub type Server;

    pub type Player;

    pub type Formulas;

    #[wasm_bindgen(method, getter)]
    fn hacking(this: &Formulas) -> HackingFormulas;

    pub type HackingFormulas;

    #[wasm_bindgen(catch, method, js_name = hackTime)]
    fn hack_time(
        this: &HackingFormulas,
        server: &Server,
        player: &Player,
    ) -> Result<f64, JsValue>;

    #[wasm_bindgen(catch, method, js_name = growTime)]
    fn grow_time(
        this: &HackingFormulas,
        server: &Server,
        player: &Player,
    ) -> Result<f64, JsValue>;

    #[wasm_bindgen(catch, method, js_name = weakenTime)]
    fn weaken_time(
        this: &HackingFormulas,
        server: &Server,
        player: &Player,
    ) -> Result<f64, JsValue>;

    pub type Date;

    #[wasm_bindgen(static_method_of = Date)]
    pub fn now() -> f64;
}

pub struct NsWrapper<'a>(Mutex<&'a NS>);

impl<'a> NsWrapper<'a> {
    pub fn new(ns: &'a NS) -> NsWrapper<'a> {
        NsWrapper(Mutex::new(ns))
    }

    fn ns(&self) -> std::sync::MutexGuard<'_, &'a NS> {
        // the wasm runtime is single threaded; a poisoned lock still holds a
        // usable reference
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn tprint(
        &self,
        text: &str,
    ) {
        self.ns().tprint(text);
    }

    pub fn print(
        &self,
        text: &str,
    ) {
        self.ns().print(text);
    }

    pub async fn sleep(
        &self,
        millis: f64,
    ) {
        let millis = millis.max(0.).round().min(i32::MAX as f64) as i32;
        let ns: &NS = *self.ns();
        ns.sleep(millis).await;
    }

    pub fn disable_log(
        &self,
        function: &str,
    ) {
        self.ns().disableLog(function);
    }

    pub fn get_hostname(&self) -> String {
        self.ns().getHostname().as_string().unwrap_or_default()
    }

    pub fn scan(
        &self,
        host: Option<&str>,
    ) -> Vec<String> {
        self.ns()
            .scan(host)
            .into_iter()
            .filter_map(|m| m.as_string())
            .collect::<Vec<_>>()
    }

    pub fn get_server(
        &self,
        host: Option<&str>,
    ) -> Server {
        self.ns().getServer(host)
    }

    pub fn get_player(&self) -> Player {
        self.ns().getPlayer()
    }

    pub fn nuke(
        &self,
        host: &str,
    ) -> bool {
        matches!(self.ns().nuke(host), Ok(true))
    }

    pub fn brute_ssh(
        &self,
        hostname: &str,
    ) -> bool {
        matches!(self.ns().brutessh(hostname), Ok(true))
    }

    pub fn ftp_crack(
        &self,
        hostname: &str,
    ) -> bool {
        matches!(self.ns().ftpcrack(hostname), Ok(true))
    }

    pub fn relay_smtp(
        &self,
        hostname: &str,
    ) -> bool {
        matches!(self.ns().relaysmtp(hostname), Ok(true))
    }

    pub fn http_worm(
        &self,
        hostname: &str,
    ) -> bool {
        matches!(self.ns().httpworm(hostname), Ok(true))
    }

    pub fn sql_inject(
        &self,
        hostname: &str,
    ) -> bool {
        matches!(self.ns().sqlinject(hostname), Ok(true))
    }

    pub fn get_player_hacking_level(&self) -> u32 {
        self.ns().getHackingLevel().max(0) as u32
    }

    pub fn get_server_money_available(
        &self,
        hostname: &str,
    ) -> f64 {
        self.ns().getServerMoneyAvailable(hostname)
    }

    pub fn get_hack_time(
        &self,
        hostname: &str,
    ) -> f64 {
        self.ns().getHackTime(hostname)
    }

    pub fn get_grow_time(
        &self,
        hostname: &str,
    ) -> f64 {
        self.ns().getGrowTime(hostname)
    }

    pub fn get_weaken_time(
        &self,
        hostname: &str,
    ) -> f64 {
        self.ns().getWeakenTime(hostname)
    }

    pub fn hack_analyze_chance(
        &self,
        hostname: &str,
    ) -> f64 {
        self.ns().hackAnalyzeChance(hostname)
    }

    pub fn hack_analyze_threads(
        &self,
        hostname: &str,
        amount: f64,
    ) -> f64 {
        self.ns().hackAnalyzeThreads(hostname, amount)
    }

    pub fn hack_analyze_security(
        &self,
        threads: u32,
        hostname: &str,
    ) -> f64 {
        self.ns().hackAnalyzeSecurity(threads as i32, hostname)
    }

    pub fn growth_analyze(
        &self,
        host: &str,
        growth_factor: f64,
        cores: Option<i32>,
    ) -> f64 {
        self.ns().growthAnalyze(host, growth_factor, cores)
    }

    pub fn growth_analyze_security(
        &self,
        threads: u32,
        hostname: &str,
    ) -> f64 {
        self.ns().growthAnalyzeSecurity(threads as i32, hostname)
    }

    pub fn weaken_analyze(
        &self,
        threads: u32,
    ) -> f64 {
        self.ns().weakenAnalyze(threads as i32)
    }

    pub fn exec(
        &self,
        script_name: &str,
        host: &str,
        num_threads: Option<u32>,
        args: &[impl core::ops::Deref<Target = str>],
    ) -> Result<Option<u32>, JsValue> {
        let args = args
            .iter()
            .map(|a| JsString::from(&**a))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        match self.ns().exec(
            script_name,
            host,
            num_threads.map(|x| x as i32),
            args,
        ) {
            Ok(x) if x <= 0 => Ok(None),
            Ok(x) => Ok(Some(x as u32)),
            Err(e) => Err(e),
        }
    }

    pub fn killall(
        &self,
        host: &str,
    ) -> bool {
        self.ns().killall(host, true)
    }

    pub fn read(
        &self,
        filename: &str,
    ) -> String {
        self.ns().read(filename).as_string().unwrap_or_default()
    }

    pub fn write(
        &self,
        filename: &str,
        data: &str,
    ) {
        self.ns().write(filename, data, "w")
    }

    pub fn scp(
        &self,
        file: &str,
        destination: &str,
        source: &str,
    ) -> bool {
        self.ns().scp(file, destination, source)
    }

    pub fn file_exists(
        &self,
        file: &str,
        host: &str,
    ) -> bool {
        self.ns().fileExists(file, host)
    }

    /// Hack, grow and weaken durations from the formulas API.
    ///
    /// The server is modeled at minimum security and maximum money, which is
    /// the state a prepared target sits in when a batch lands.
    pub fn formulas_hgw_time(
        &self,
        hostname: &str,
    ) -> Result<(f64, f64, f64), JsValue> {
        use crate::utils::{
            get_attribute,
            set_attribute,
        };

        let server = self.get_server(Some(hostname));
        let player = self.get_player();

        let min_difficulty =
            get_attribute(&server, "minDifficulty", JsValue::as_f64)?
                .unwrap_or_default();
        let money_max = get_attribute(&server, "moneyMax", JsValue::as_f64)?
            .unwrap_or_default();
        set_attribute(&server, "hackDifficulty", min_difficulty)?;
        set_attribute(&server, "moneyAvailable", money_max)?;

        let hacking = self.ns().formulas().hacking();

        Ok((
            hacking.hack_time(&server, &player)?,
            hacking.grow_time(&server, &player)?,
            hacking.weaken_time(&server, &player)?,
        ))
    }
}
